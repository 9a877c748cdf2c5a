//! Settings consumed by the core and the duration syntax used to set them.

use crate::liveness::Timeouts;
use crate::stability::DEFAULT_STABILITY_THRESHOLD;
use std::time::Duration;

/// Recognized options the host may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub timeouts: Timeouts,
    /// Consecutive equal readings before a scale is reported stable
    pub stability_threshold: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            stability_threshold: DEFAULT_STABILITY_THRESHOLD,
        }
    }
}

/// Parse a duration such as `500ms`, `6s`, `1m` or `2h`.
///
/// A bare number is read as seconds.
///
/// # Examples
/// ```
/// use scale_listener::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("6s").unwrap(), Duration::from_secs(6));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" must be tried before "m" and "s".
    let units: [(&str, fn(u64) -> Duration); 4] = [
        ("ms", Duration::from_millis),
        ("h", |n| Duration::from_secs(n * 3600)),
        ("m", |n| Duration::from_secs(n * 60)),
        ("s", Duration::from_secs),
    ];

    let (number, to_duration) = units
        .iter()
        .find_map(|(suffix, f)| src.strip_suffix(*suffix).map(|n| (n, *f)))
        .unwrap_or((src, Duration::from_secs as fn(u64) -> Duration));

    number
        .trim()
        .parse::<u64>()
        .map(to_duration)
        .map_err(|_| format!("invalid duration: {src}"))
}

/// Like [`parse_duration`], but rejects a zero duration.
pub fn parse_nonzero_duration(src: &str) -> Result<Duration, String> {
    match parse_duration(src)? {
        Duration::ZERO => Err(format!("duration must be greater than zero: {src}")),
        duration => Ok(duration),
    }
}
