//! Debounced stability detection for weight readings.
//!
//! A scale is considered stable once the same weight has been reported a
//! number of times in a row. Readings are compared on their scaled integer
//! representation, so `12.34 g` only equals another `12.34 g`.

use crate::protocol::RawReading;

/// Consecutive equal readings required by default.
pub const DEFAULT_STABILITY_THRESHOLD: u32 = 4;

/// Run-length stability detector for a single device.
///
/// The device registry owns one filter per address.
#[derive(Debug, Clone)]
pub struct StabilityFilter {
    /// Number of consecutive equal readings needed for stability
    threshold: u32,
    /// Last reading seen
    last: Option<RawReading>,
    /// Length of the current run of equal readings
    run: u32,
}

impl StabilityFilter {
    /// Create a filter. A threshold of zero behaves like one.
    ///
    /// # Example
    /// ```
    /// use scale_listener::stability::StabilityFilter;
    ///
    /// let filter = StabilityFilter::new(4);
    /// assert_eq!(filter.run_length(), 0);
    /// ```
    pub fn new(threshold: u32) -> Self {
        StabilityFilter {
            threshold: threshold.max(1),
            last: None,
            run: 0,
        }
    }

    /// Feed the next reading and return whether the device is now stable.
    ///
    /// A self-reported stability bit, when the protocol has one, must agree
    /// with the run-length counter for the result to be `true`.
    pub fn update(&mut self, reading: &RawReading) -> bool {
        match &self.last {
            Some(last) if last.same_weight(reading) => self.run = self.run.saturating_add(1),
            _ => self.run = 1,
        }
        self.last = Some(reading.clone());

        let counted = self.run >= self.threshold;
        counted && reading.self_reported_stable.unwrap_or(true)
    }

    pub fn run_length(&self) -> u32 {
        self.run
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

impl Default for StabilityFilter {
    fn default() -> Self {
        Self::new(DEFAULT_STABILITY_THRESHOLD)
    }
}
