//! Output formatters for scale device updates.
//!
//! The core hands over a [`DeviceState`] snapshot after each successful
//! decode and each availability change; a formatter turns it into one line
//! of output. InfluxDB line protocol is the only format so far.

pub mod influxdb;

use crate::state::DeviceState;
use crate::units::DisplayUnit;

/// Trait for formatting device snapshots into output strings.
pub trait OutputFormatter: Send + Sync {
    /// Format a snapshot, presenting weight in `unit`.
    fn format(&self, state: &DeviceState, unit: DisplayUnit) -> String;
}
