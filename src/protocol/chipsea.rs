//! Chipsea weight frame decoder.
//!
//! The frame starts with the little-endian company id, so byte 0 is the
//! `0xCA` header. There is no checksum; a frame is accepted when its length,
//! header and unit code are valid.
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0 | header `0xCA` |
//! | 3 | status: bit 7 sign, bits 3–6 unit, bits 1–2 decimals, bit 0 lock |
//! | 5–6 | weight, u16 big-endian |

use super::{DecodeError, Decoded, ProtocolFamily, RawReading};
use crate::units::Unit;
use std::time::SystemTime;

pub const HEADER: u8 = 0xCA;
pub const MIN_FRAME_LEN: usize = 7;
/// Longer frames carry trailing bytes that are not part of the weight record.
pub const MAX_FRAME_LEN: usize = 8;

const STATUS_INDEX: usize = 3;
const WEIGHT_INDEX: usize = 5;

const SIGN_MASK: u8 = 0x80;
const LOCK_MASK: u8 = 0x01;

const UNIT_GRAMS: u8 = 0x00;
const UNIT_OUNCES: u8 = 0x03;
const UNIT_POUNDS: u8 = 0x06;
const UNIT_KILOGRAMS: u8 = 0x08;

fn malformed(reason: impl Into<String>) -> DecodeError {
    DecodeError::malformed(ProtocolFamily::Chipsea, reason)
}

fn unit_from_code(code: u8) -> Option<Unit> {
    match code {
        UNIT_GRAMS => Some(Unit::Gram),
        UNIT_OUNCES => Some(Unit::Ounce),
        UNIT_POUNDS => Some(Unit::Pound),
        UNIT_KILOGRAMS => Some(Unit::Kilogram),
        _ => None,
    }
}

/// Decode a Chipsea frame.
pub fn decode(frame: &[u8], timestamp: SystemTime) -> Result<Decoded, DecodeError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(malformed(format!(
            "expected at least {MIN_FRAME_LEN} bytes, got {}",
            frame.len()
        )));
    }
    let frame = &frame[..frame.len().min(MAX_FRAME_LEN)];
    if frame[0] != HEADER {
        return Err(malformed(format!("bad header {:#04x}", frame[0])));
    }

    let status = frame[STATUS_INDEX];
    let unit_code = (status >> 3) & 0x0F;
    let unit = unit_from_code(unit_code)
        .ok_or_else(|| malformed(format!("unknown unit code {unit_code:#04x}")))?;
    let decimals = (status >> 1) & 0x03;
    let magnitude = u16::from_be_bytes([frame[WEIGHT_INDEX], frame[WEIGHT_INDEX + 1]]);

    tracing::trace!(
        frame = ?frame,
        status,
        locked = status & LOCK_MASK != 0,
        "chipsea frame"
    );

    Ok(Decoded {
        reading: RawReading {
            magnitude: u32::from(magnitude),
            decimals,
            negative: status & SIGN_MASK != 0 && magnitude != 0,
            unit,
            self_reported_stable: None,
            timestamp,
        },
        battery: None,
    })
}
