//! Passive BLE scanning backends.
//!
//! A backend listens for advertisements and forwards every one of them as
//! an [`Advertisement`]; classification and decoding happen in the core.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::Advertisement;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[allow(dead_code)]
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Channel buffer size for received advertisements.
pub const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 256;

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

/// Start a passive scan on the given backend.
///
/// Advertisements from every device are forwarded; the receiver closes when
/// the backend stops.
pub async fn start_scan(backend: Backend) -> Result<mpsc::Receiver<Advertisement>, ScanError> {
    tracing::info!(%backend, "starting passive scan");
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan().await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn test_backend_from_str() {
        #[cfg(feature = "bluer")]
        assert_eq!(Backend::from_str("bluer", true).unwrap(), Backend::Bluer);
        #[cfg(feature = "hci")]
        assert_eq!(Backend::from_str("HCI", true).unwrap(), Backend::Hci);
        assert!(Backend::from_str("dbus", true).is_err());
    }

    #[test]
    fn test_backend_display() {
        #[cfg(feature = "bluer")]
        assert_eq!(Backend::Bluer.to_string(), "bluer");
        #[cfg(feature = "hci")]
        assert_eq!(Backend::Hci.to_string(), "hci");
    }

    #[test]
    fn test_default_backend_round_trips() {
        let name = Backend::default().to_string();
        assert_eq!(Backend::from_str(&name, false).unwrap(), Backend::default());
    }

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::Bluetooth("adapter off".to_string());
        assert_eq!(err.to_string(), "Bluetooth error: adapter off");
    }
}
