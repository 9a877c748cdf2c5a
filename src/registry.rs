//! Per-device state map and the advertisement processing pipeline.
//!
//! Each advertisement runs classify → decode → stability → normalize →
//! liveness while holding only its own device's lock. Advertisements from
//! different scales can be processed from different threads at the same
//! time; advertisements from one scale are applied one after another.

use crate::advertisement::Advertisement;
use crate::config::Settings;
use crate::liveness::is_expired;
use crate::mac_address::MacAddress;
use crate::protocol::{self, DecodeError, ErrorKind, ProtocolFamily};
use crate::stability::StabilityFilter;
use crate::state::{DeviceState, Diagnostics};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::SystemTime;

/// Consecutive advertisements of another family needed to re-classify an address.
pub const RECLASSIFY_AFTER: u32 = 3;

#[derive(Debug)]
struct DeviceEntry {
    /// Family pinned by the first successful decode
    family: Option<ProtocolFamily>,
    state: Option<DeviceState>,
    filter: StabilityFilter,
    /// Consecutive advertisements classified as a family other than the pinned one
    mismatches: u32,
    diagnostics: Diagnostics,
}

impl DeviceEntry {
    fn new(threshold: u32) -> Self {
        Self {
            family: None,
            state: None,
            filter: StabilityFilter::new(threshold),
            mismatches: 0,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Decide which family to decode as, or `None` to ignore the advertisement.
    ///
    /// Only counts the mismatch streak; the pinned family is replaced by
    /// [`DeviceEntry::reclassify`] once a frame of the new family decodes.
    fn resolve_family(&mut self, address: MacAddress, seen: ProtocolFamily) -> Option<ProtocolFamily> {
        let Some(pinned) = self.family else {
            return Some(seen);
        };
        if pinned == seen {
            self.mismatches = 0;
            return Some(seen);
        }

        self.mismatches = self.mismatches.saturating_add(1);
        if self.mismatches < RECLASSIFY_AFTER {
            tracing::debug!(%address, %pinned, %seen, "ignoring advertisement from other family");
            return None;
        }
        Some(seen)
    }

    /// Drop everything learned under the old family.
    fn reclassify(&mut self, address: MacAddress, to: ProtocolFamily) {
        if let Some(from) = self.family.filter(|f| *f != to) {
            tracing::info!(%address, %from, %to, "re-classifying device");
            self.filter = StabilityFilter::new(self.filter.threshold());
            self.diagnostics.reclassifications += 1;
        }
        self.family = Some(to);
        self.mismatches = 0;
    }
}

/// Registry of every scale seen so far.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    settings: Settings,
    devices: RwLock<HashMap<MacAddress, Arc<Mutex<DeviceEntry>>>>,
}

fn lock(entry: &Mutex<DeviceEntry>) -> MutexGuard<'_, DeviceEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeviceRegistry {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            devices: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn entry(&self, address: MacAddress) -> Arc<Mutex<DeviceEntry>> {
        if let Some(entry) = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
        {
            return Arc::clone(entry);
        }

        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let entry = devices
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(DeviceEntry::new(self.settings.stability_threshold))));
        Arc::clone(entry)
    }

    fn existing(&self, address: &MacAddress) -> Option<Arc<Mutex<DeviceEntry>>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }

    /// Process one advertisement and return the updated device snapshot.
    ///
    /// Unrecognized advertisements are ignored without creating any state.
    /// Malformed frames and checksum failures are counted in the device's
    /// diagnostics and leave its state, including availability, untouched.
    pub fn on_advertisement(&self, adv: &Advertisement) -> Result<DeviceState, DecodeError> {
        let seen = protocol::classify(adv);
        if seen == ProtocolFamily::Unknown {
            return Err(DecodeError::UnrecognizedProtocol);
        }

        let entry = self.entry(adv.address);
        let mut entry = lock(&entry);
        entry.diagnostics.advertisements += 1;

        let family = entry
            .resolve_family(adv.address, seen)
            .ok_or(DecodeError::UnrecognizedProtocol)?;

        let decoded = match protocol::decode_as(family, adv) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::debug!(address = %adv.address, %family, error = %err, "discarding frame");
                entry.diagnostics.record(err.kind());
                return Err(err);
            }
        };

        entry.reclassify(adv.address, family);
        let stable = entry.filter.update(&decoded.reading);
        let normalized = crate::units::normalize(&decoded.reading);
        if normalized.clamped {
            tracing::warn!(
                address = %adv.address,
                value = decoded.reading.value(),
                unit = %decoded.reading.unit,
                "weight out of range, clamped"
            );
            entry.diagnostics.record(ErrorKind::OutOfRangeValue);
        }
        let battery_clamped = decoded.battery.is_some_and(|b| b.clamped);
        if battery_clamped {
            entry.diagnostics.record(ErrorKind::OutOfRangeValue);
        }

        let was_available = entry.state.as_ref().is_some_and(|s| s.available);
        if !was_available {
            tracing::info!(address = %adv.address, %family, "scale available");
        }

        let state = DeviceState {
            address: adv.address,
            family,
            reading: decoded.reading,
            stable,
            battery: decoded.battery.map(|b| b.percent),
            available: true,
            last_seen: adv.timestamp,
            out_of_range: normalized.clamped || battery_clamped,
        };
        tracing::debug!(
            address = %adv.address,
            grams = normalized.grams,
            stable,
            battery = ?state.battery,
            "scale reading"
        );

        entry.diagnostics.decoded += 1;
        entry.state = Some(state.clone());
        Ok(state)
    }

    /// Mark every device silent for longer than its timeout as unavailable.
    ///
    /// Returns snapshots of the devices that changed, ordered by address.
    pub fn expire(&self, now: SystemTime) -> Vec<DeviceState> {
        let entries: Vec<_> = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut expired: Vec<DeviceState> = entries
            .iter()
            .filter_map(|entry| {
                let mut entry = lock(entry);
                let state = entry.state.as_mut()?;
                let timeout = self.settings.timeouts.for_family(state.family);
                if !state.available || !is_expired(state.last_seen, now, timeout) {
                    return None;
                }
                state.available = false;
                tracing::info!(address = %state.address, family = %state.family, "scale unavailable");
                Some(state.clone())
            })
            .collect();

        expired.sort_by_key(|s| s.address);
        expired
    }

    /// Latest snapshot for a device, if it has ever been decoded.
    pub fn snapshot(&self, address: &MacAddress) -> Option<DeviceState> {
        let entry = self.existing(address)?;
        let entry = lock(&entry);
        entry.state.clone()
    }

    pub fn diagnostics(&self, address: &MacAddress) -> Option<Diagnostics> {
        let entry = self.existing(address)?;
        let entry = lock(&entry);
        Some(entry.diagnostics)
    }

    /// Number of addresses with a decoded state.
    pub fn len(&self) -> usize {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entry| lock(entry).state.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
