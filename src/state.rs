//! Per-device state snapshots and diagnostic counters.

use crate::mac_address::MacAddress;
use crate::protocol::{ErrorKind, ProtocolFamily, RawReading};
use crate::units::{Normalized, normalize};
use std::time::SystemTime;

/// Latest known state of one scale.
///
/// Handed to the output layer after every successful decode and every
/// availability change. While `available` is false the weight, stability and
/// battery fields describe the last reading before the scale went silent and
/// must be treated as stale.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub address: MacAddress,
    pub family: ProtocolFamily,
    /// Most recent reading, in the scale's native unit
    pub reading: RawReading,
    pub stable: bool,
    /// Battery percentage, only reported by some families
    pub battery: Option<u8>,
    pub available: bool,
    pub last_seen: SystemTime,
    /// The latest reading carried a value that had to be clamped
    pub out_of_range: bool,
}

impl DeviceState {
    /// Canonical weight derived from the latest reading.
    pub fn normalized(&self) -> Normalized {
        normalize(&self.reading)
    }

    /// Canonical weight in grams.
    pub fn weight_grams(&self) -> f64 {
        self.normalized().grams
    }
}

/// Counters a host can expose for troubleshooting a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Advertisements classified as a known family
    pub advertisements: u64,
    pub decoded: u64,
    pub decode_failures: u64,
    pub malformed_frames: u64,
    pub checksum_failures: u64,
    pub out_of_range: u64,
    pub reclassifications: u64,
}

impl Diagnostics {
    pub(crate) fn record(&mut self, kind: ErrorKind) {
        match kind {
            ErrorKind::UnrecognizedProtocol => {}
            ErrorKind::MalformedFrame => {
                self.decode_failures += 1;
                self.malformed_frames += 1;
            }
            ErrorKind::ChecksumMismatch => {
                self.decode_failures += 1;
                self.checksum_failures += 1;
            }
            ErrorKind::OutOfRangeValue => self.out_of_range += 1,
        }
    }
}
