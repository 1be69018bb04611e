//! Per-tag publish rate limiting.
//!
//! Each rate-limited sink owns one [`RateLimiter`]. It lets at most one
//! measurement per tag through every `min_interval`, which keeps output volume
//! down when tags broadcast every second but their readings change slowly.

use crate::mac_address::MacAddress;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Limits how often each tag (identified by MAC address) is admitted.
///
/// Tags are tracked independently. The first call for a tag is always admitted,
/// and a rejected call leaves the tag's timer untouched. The map is behind a
/// mutex so one limiter can be shared between tasks.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_admitted: Mutex<HashMap<MacAddress, Instant>>,
}

impl RateLimiter {
    /// Create a limiter admitting one event per tag per `min_interval`.
    ///
    /// ```
    /// use std::time::Duration;
    /// use ruuvi_bridge::limiter::RateLimiter;
    /// use ruuvi_bridge::MacAddress;
    ///
    /// let limiter = RateLimiter::new(Duration::from_secs(3));
    /// let mac = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    /// assert!(limiter.admit(&mac));
    /// assert!(!limiter.admit(&mac));
    /// ```
    pub fn new(min_interval: Duration) -> Self {
        RateLimiter {
            min_interval,
            last_admitted: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Check whether an event from `mac` may pass now.
    pub fn admit(&self, mac: &MacAddress) -> bool {
        self.admit_at(mac, Instant::now())
    }

    /// Check whether an event from `mac` may pass at `now`.
    ///
    /// Returns `true` and restarts the tag's timer when no event was admitted
    /// before, or when at least `min_interval` has elapsed since the last one.
    pub fn admit_at(&self, mac: &MacAddress, now: Instant) -> bool {
        if self.min_interval.is_zero() {
            return true;
        }

        let mut last_admitted = self
            .last_admitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match last_admitted.get(mac) {
            Some(last) if now.saturating_duration_since(*last) < self.min_interval => false,
            _ => {
                last_admitted.insert(*mac, now);
                true
            }
        }
    }
}

/// Errors returned by [`parse_duration`].
#[derive(Error, Debug, PartialEq)]
pub enum ParseDurationError {
    #[error("empty duration string")]
    Empty,
    #[error("invalid duration: {0}")]
    Invalid(String),
}

/// Parse a duration from a human-readable string.
///
/// Supports the suffixes `ms`, `s`, `m` and `h`. A bare number is seconds.
///
/// ```
/// use ruuvi_bridge::limiter::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, ParseDurationError> {
    let src = src.trim();
    if src.is_empty() {
        return Err(ParseDurationError::Empty);
    }

    let (number, unit) = if let Some(num) = src.strip_suffix("ms") {
        (num, Duration::from_millis(1))
    } else if let Some(num) = src.strip_suffix('h') {
        (num, Duration::from_secs(3600))
    } else if let Some(num) = src.strip_suffix('m') {
        (num, Duration::from_secs(60))
    } else if let Some(num) = src.strip_suffix('s') {
        (num, Duration::from_secs(1))
    } else {
        (src, Duration::from_secs(1))
    };

    let count: u32 = number
        .trim()
        .parse()
        .map_err(|_| ParseDurationError::Invalid(src.to_owned()))?;
    unit.checked_mul(count)
        .ok_or_else(|| ParseDurationError::Invalid(src.to_owned()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u32),
    Text(String),
}

/// Deserialize a duration written either as whole seconds or in the
/// [`parse_duration`] syntax.
pub fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(u64::from(secs))),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
