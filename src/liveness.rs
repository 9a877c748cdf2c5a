//! Availability tracking driven by advertisement recency.
//!
//! Scales never hold a connection, so "available" simply means an
//! advertisement was decoded recently enough. The core does not own a clock:
//! the host calls [`crate::registry::DeviceRegistry::expire`] from its own
//! timer and the decision is made by the pure [`is_expired`] predicate.

use crate::protocol::ProtocolFamily;
use std::time::{Duration, SystemTime};

/// Felicita scales advertise roughly every second while awake.
pub const DEFAULT_FELICITA_TIMEOUT: Duration = Duration::from_secs(6);

/// Chipsea scales advertise less often and pause while the display dims.
pub const DEFAULT_CHIPSEA_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether a device last seen at `last_seen` should be unavailable at `now`.
///
/// The device stays available for exactly `timeout`; a clock reading earlier
/// than `last_seen` never expires it.
pub fn is_expired(last_seen: SystemTime, now: SystemTime, timeout: Duration) -> bool {
    now.duration_since(last_seen)
        .is_ok_and(|elapsed| elapsed > timeout)
}

/// Per-family silence allowed before a device is marked unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub felicita: Duration,
    pub chipsea: Duration,
}

impl Timeouts {
    /// Timeout for a family; unknown devices never get state, so they get zero.
    pub fn for_family(&self, family: ProtocolFamily) -> Duration {
        match family {
            ProtocolFamily::Felicita => self.felicita,
            ProtocolFamily::Chipsea => self.chipsea,
            ProtocolFamily::Unknown => Duration::ZERO,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            felicita: DEFAULT_FELICITA_TIMEOUT,
            chipsea: DEFAULT_CHIPSEA_TIMEOUT,
        }
    }
}
