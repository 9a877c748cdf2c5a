//! Felicita weight frame decoder.
//!
//! Frames are 18 bytes with the weight spelled out in ASCII:
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0–1 | header `01 02` |
//! | 2 | sign, `+` or `-` |
//! | 3–8 | six ASCII digits, leading spaces allowed |
//! | 9–10 | unit, `g ` or `oz` |
//! | 11 | status: bit 7 stable, bits 0–3 decimal places |
//! | 12–14 | timer |
//! | 15 | battery percent |
//! | 16 | reserved |
//! | 17 | checksum, sum of bytes 2–16 modulo 256 |

use super::{Battery, DecodeError, Decoded, ProtocolFamily, RawReading};
use crate::units::Unit;
use std::time::SystemTime;

pub const FRAME_LEN: usize = 18;
pub const HEADER: [u8; 2] = [0x01, 0x02];

const SIGN_INDEX: usize = 2;
const DIGITS: std::ops::Range<usize> = 3..9;
const UNIT: std::ops::Range<usize> = 9..11;
const STATUS_INDEX: usize = 11;
const BATTERY_INDEX: usize = 15;
const CHECKSUM_INDEX: usize = 17;
const CHECKSUM_PAYLOAD: std::ops::Range<usize> = 2..17;

const STABLE_MASK: u8 = 0x80;
const DECIMALS_MASK: u8 = 0x0F;
const MAX_DECIMALS: u8 = 6;
const MAX_BATTERY_PERCENT: u8 = 100;

fn malformed(reason: impl Into<String>) -> DecodeError {
    DecodeError::malformed(ProtocolFamily::Felicita, reason)
}

/// Checksum over the payload bytes of a full frame.
pub fn checksum(frame: &[u8; FRAME_LEN]) -> u8 {
    frame[CHECKSUM_PAYLOAD]
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn parse_magnitude(digits: &[u8]) -> Result<u32, DecodeError> {
    let mut seen_digit = false;
    digits.iter().try_fold(0u32, |acc, &b| match b {
        b'0'..=b'9' => {
            seen_digit = true;
            Ok(acc * 10 + u32::from(b - b'0'))
        }
        b' ' if !seen_digit => Ok(acc),
        other => Err(malformed(format!("invalid weight digit {other:#04x}"))),
    })
}

fn parse_unit(bytes: &[u8]) -> Result<Unit, DecodeError> {
    match bytes {
        b"g " => Ok(Unit::Gram),
        b"oz" => Ok(Unit::Ounce),
        other => Err(malformed(format!("unknown unit {other:02x?}"))),
    }
}

/// Decode a Felicita frame.
pub fn decode(frame: &[u8], timestamp: SystemTime) -> Result<Decoded, DecodeError> {
    let frame: &[u8; FRAME_LEN] = frame
        .try_into()
        .map_err(|_| malformed(format!("expected {FRAME_LEN} bytes, got {}", frame.len())))?;
    if frame[..2] != HEADER {
        return Err(malformed(format!("bad header {:02x?}", &frame[..2])));
    }

    let expected = checksum(frame);
    let actual = frame[CHECKSUM_INDEX];
    if expected != actual {
        return Err(DecodeError::ChecksumMismatch { expected, actual });
    }

    tracing::trace!(frame = ?frame, "felicita frame");

    let negative = match frame[SIGN_INDEX] {
        b'+' => false,
        b'-' => true,
        other => return Err(malformed(format!("invalid sign byte {other:#04x}"))),
    };
    let magnitude = parse_magnitude(&frame[DIGITS])?;
    let unit = parse_unit(&frame[UNIT])?;

    let status = frame[STATUS_INDEX];
    let decimals = status & DECIMALS_MASK;
    if decimals > MAX_DECIMALS {
        return Err(malformed(format!("{decimals} decimal places")));
    }

    let raw_battery = frame[BATTERY_INDEX];
    let battery = Battery {
        percent: raw_battery.min(MAX_BATTERY_PERCENT),
        clamped: raw_battery > MAX_BATTERY_PERCENT,
    };
    if battery.clamped {
        tracing::warn!(raw = raw_battery, "felicita battery level out of range, clamped");
    }

    Ok(Decoded {
        reading: RawReading {
            magnitude,
            decimals,
            negative: negative && magnitude != 0,
            unit,
            self_reported_stable: Some(status & STABLE_MASK != 0),
            timestamp,
        },
        battery: Some(battery),
    })
}
