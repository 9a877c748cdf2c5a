//! `scale-listener` library.
//!
//! Decodes BLE advertisements from Felicita and Chipsea kitchen scales into
//! weight readings, tracks per-scale stability and availability, and
//! normalizes weights to grams.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup
//! and process exit codes. The run loop lives in [`crate::app`] where it can
//! be tested with an injected scanner and injected output streams.

pub mod advertisement;
pub mod app;
pub mod config;
pub mod liveness;
pub mod mac_address;
pub mod output;
pub mod protocol;
pub mod registry;
pub mod scanner;
pub mod stability;
pub mod state;
pub mod units;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::Advertisement;
pub use config::{Settings, parse_duration};
pub use mac_address::MacAddress;
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use protocol::{DecodeError, ErrorKind, ProtocolFamily, RawReading, classify};
pub use registry::DeviceRegistry;
pub use scanner::{Backend, ScanError};
pub use stability::StabilityFilter;
pub use state::{DeviceState, Diagnostics};
pub use units::{DisplayUnit, Unit};
