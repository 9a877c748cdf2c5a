//! Scale protocol families: classification and frame decoding.
//!
//! An advertisement is first classified by [`classify`] from its service
//! UUIDs, manufacturer ids and local name. The resulting [`ProtocolFamily`]
//! selects the frame decoder; both decoders produce the same [`Decoded`]
//! shape so everything downstream is family-agnostic.

pub mod chipsea;
pub mod felicita;

use crate::advertisement::{Advertisement, uuid_from_u16};
use crate::units::Unit;
use std::fmt;
use std::time::SystemTime;
use thiserror::Error;
use uuid::Uuid;

/// Company id carried by Felicita manufacturer data.
pub const FELICITA_COMPANY_ID: u16 = 58000;

/// Company id carried by Chipsea manufacturer data (0x10CA).
pub const CHIPSEA_COMPANY_ID: u16 = 4298;

/// Service UUIDs advertised by Felicita scales.
pub const FELICITA_SERVICE_UUIDS: [Uuid; 2] = [uuid_from_u16(0xffe0), uuid_from_u16(0xfee0)];

/// Service UUID advertised by Chipsea scales.
pub const CHIPSEA_SERVICE_UUID: Uuid = uuid_from_u16(0xfff0);

/// Local name prefixes, compared case-insensitively.
pub const FELICITA_NAME_PREFIXES: [&str; 1] = ["FELICITA"];
pub const CHIPSEA_NAME_PREFIXES: [&str; 4] = ["Chipsea-BLE", "SmartChef", "ProfiCook", "PC-KW"];

/// Protocol family an advertisement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolFamily {
    Felicita,
    Chipsea,
    Unknown,
}

impl ProtocolFamily {
    /// Name of the decoder handling this family, `None` for [`ProtocolFamily::Unknown`].
    pub fn decoder_name(self) -> Option<&'static str> {
        match self {
            ProtocolFamily::Felicita => Some("felicita"),
            ProtocolFamily::Chipsea => Some("chipsea"),
            ProtocolFamily::Unknown => None,
        }
    }

    pub fn company_id(self) -> Option<u16> {
        match self {
            ProtocolFamily::Felicita => Some(FELICITA_COMPANY_ID),
            ProtocolFamily::Chipsea => Some(CHIPSEA_COMPANY_ID),
            ProtocolFamily::Unknown => None,
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.decoder_name().unwrap_or("unknown"))
    }
}

/// Broad category of a decode outcome, used for diagnostic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnrecognizedProtocol,
    MalformedFrame,
    ChecksumMismatch,
    /// Not an error: the reading was accepted with a clamped value.
    OutOfRangeValue,
}

/// Error types for classifying and decoding scale advertisements.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Unrecognized protocol")]
    UnrecognizedProtocol,
    #[error("Malformed {family} frame: {reason}")]
    MalformedFrame {
        family: ProtocolFamily,
        reason: String,
    },
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

impl DecodeError {
    pub(crate) fn malformed(family: ProtocolFamily, reason: impl Into<String>) -> Self {
        DecodeError::MalformedFrame {
            family,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DecodeError::UnrecognizedProtocol => ErrorKind::UnrecognizedProtocol,
            DecodeError::MalformedFrame { .. } => ErrorKind::MalformedFrame,
            DecodeError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
        }
    }
}

/// A weight exactly as the scale reported it.
///
/// The magnitude is kept as the unscaled integer so consecutive readings can
/// be compared without floating point.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub magnitude: u32,
    pub decimals: u8,
    pub negative: bool,
    pub unit: Unit,
    /// Stability as reported by the scale itself, when the protocol has it.
    pub self_reported_stable: Option<bool>,
    pub timestamp: SystemTime,
}

impl RawReading {
    /// Signed integer in units of `10^-decimals`.
    pub fn scaled(&self) -> i64 {
        let magnitude = i64::from(self.magnitude);
        if self.negative { -magnitude } else { magnitude }
    }

    /// Value in the native unit.
    pub fn value(&self) -> f64 {
        self.scaled() as f64 / 10f64.powi(i32::from(self.decimals))
    }

    /// Whether two readings show the same weight on the scale's display.
    pub fn same_weight(&self, other: &RawReading) -> bool {
        self.scaled() == other.scaled()
            && self.decimals == other.decimals
            && self.unit == other.unit
    }
}

/// Battery level decoded from a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Battery {
    pub percent: u8,
    /// The frame carried a value above 100 that was clamped.
    pub clamped: bool,
}

/// Output shared by both frame decoders.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub reading: RawReading,
    pub battery: Option<Battery>,
}

fn name_has_prefix(name: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| {
        name.get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}

fn is_felicita(adv: &Advertisement) -> bool {
    FELICITA_SERVICE_UUIDS.iter().any(|u| adv.advertises(u))
        || adv
            .manufacturer_data
            .get(&FELICITA_COMPANY_ID)
            .is_some_and(|data| data.starts_with(&felicita::HEADER))
        || adv
            .name
            .as_deref()
            .is_some_and(|n| name_has_prefix(n, &FELICITA_NAME_PREFIXES))
}

fn is_chipsea(adv: &Advertisement) -> bool {
    adv.advertises(&CHIPSEA_SERVICE_UUID)
        || adv.manufacturer_data.contains_key(&CHIPSEA_COMPANY_ID)
        || adv
            .name
            .as_deref()
            .is_some_and(|n| name_has_prefix(n, &CHIPSEA_NAME_PREFIXES))
}

/// Classify an advertisement. Matches for both families, or none, yield `Unknown`.
pub fn classify(adv: &Advertisement) -> ProtocolFamily {
    match (is_felicita(adv), is_chipsea(adv)) {
        (true, false) => ProtocolFamily::Felicita,
        (false, true) => ProtocolFamily::Chipsea,
        _ => ProtocolFamily::Unknown,
    }
}

/// Decode a frame with the decoder selected by `family`.
pub fn decode(
    family: ProtocolFamily,
    frame: &[u8],
    timestamp: SystemTime,
) -> Result<Decoded, DecodeError> {
    match family {
        ProtocolFamily::Felicita => felicita::decode(frame, timestamp),
        ProtocolFamily::Chipsea => chipsea::decode(frame, timestamp),
        ProtocolFamily::Unknown => Err(DecodeError::UnrecognizedProtocol),
    }
}

/// Classify an advertisement and decode its frame in one step.
pub fn decode_advertisement(adv: &Advertisement) -> Result<(ProtocolFamily, Decoded), DecodeError> {
    let family = classify(adv);
    decode_as(family, adv).map(|decoded| (family, decoded))
}

/// Decode an advertisement as a known family, skipping classification.
pub fn decode_as(family: ProtocolFamily, adv: &Advertisement) -> Result<Decoded, DecodeError> {
    if family == ProtocolFamily::Unknown {
        return Err(DecodeError::UnrecognizedProtocol);
    }
    let frame = adv
        .frame_for(family)
        .ok_or_else(|| DecodeError::malformed(family, "no manufacturer data"))?;
    decode(family, &frame, adv.timestamp)
}
