use crate::advertisement::Advertisement;
use crate::mac_address::MacAddress;
use crate::protocol::{RawReading, felicita};
use crate::units::Unit;
use std::time::SystemTime;

/// A stable scale address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xC8, 0x47, 0x8C, 0x00, 0x11, 0x22]);

/// An empty advertisement from [`TEST_MAC`] received at the epoch.
pub fn advertisement() -> Advertisement {
    Advertisement::new(TEST_MAC, SystemTime::UNIX_EPOCH)
}

/// A positive reading with no self-reported stability.
pub fn reading(magnitude: u32, decimals: u8, unit: Unit) -> RawReading {
    RawReading {
        magnitude,
        decimals,
        negative: false,
        unit,
        self_reported_stable: None,
        timestamp: SystemTime::UNIX_EPOCH,
    }
}

/// Build a Felicita frame with a valid checksum.
pub fn felicita_frame(
    sign: u8,
    digits: &[u8; 6],
    unit: &[u8; 2],
    decimals: u8,
    stable: bool,
    battery: u8,
) -> Vec<u8> {
    let mut frame = [0u8; felicita::FRAME_LEN];
    frame[..2].copy_from_slice(&felicita::HEADER);
    frame[2] = sign;
    frame[3..9].copy_from_slice(digits);
    frame[9..11].copy_from_slice(unit);
    frame[11] = decimals | if stable { 0x80 } else { 0x00 };
    frame[15] = battery;
    frame[17] = felicita::checksum(&frame);
    frame.to_vec()
}

/// Compose a Chipsea status byte.
pub fn chipsea_status(negative: bool, unit_code: u8, decimals: u8, locked: bool) -> u8 {
    (u8::from(negative) << 7) | (unit_code << 3) | (decimals << 1) | u8::from(locked)
}

/// Build a full 7-byte Chipsea frame, company id included.
pub fn chipsea_frame(status: u8, weight: u16) -> Vec<u8> {
    let [hi, lo] = weight.to_be_bytes();
    vec![0xCA, 0x10, 0x00, status, 0x00, hi, lo]
}
