//! Duration type for sleeps, timeouts and retry delays.
//!
//! The queue schedules at second granularity and accepts durations as
//! strings such as `"90s"`, so this type stores whole seconds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A time interval in whole seconds.
///
/// # Example
///
/// ```
/// use upstash_workflow::Duration;
///
/// assert_eq!(Duration::from_minutes(2).to_seconds(), 120);
/// assert_eq!(Duration::from_hours(1).to_queue_string(), "3600s");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Duration {
    seconds: u64,
}

impl Duration {
    /// Creates a new Duration from the given number of seconds.
    pub fn from_seconds(seconds: u64) -> Self {
        Self { seconds }
    }

    /// Creates a new Duration from the given number of minutes.
    pub fn from_minutes(minutes: u64) -> Self {
        Self {
            seconds: minutes.saturating_mul(60),
        }
    }

    /// Creates a new Duration from the given number of hours.
    pub fn from_hours(hours: u64) -> Self {
        Self {
            seconds: hours.saturating_mul(3600),
        }
    }

    /// Creates a new Duration from the given number of days.
    pub fn from_days(days: u64) -> Self {
        Self {
            seconds: days.saturating_mul(86400),
        }
    }

    /// Returns the duration in seconds.
    pub fn to_seconds(&self) -> u64 {
        self.seconds
    }

    /// Formats the duration the way the queue's delay and timeout headers expect.
    pub fn to_queue_string(&self) -> String {
        format!("{}s", self.seconds)
    }

    /// Parses a queue duration string.
    ///
    /// Accepts a bare number of seconds or a number followed by one of
    /// `s`, `m`, `h`, `d`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        let (digits, unit) = match value.char_indices().last() {
            Some((idx, c)) if c.is_ascii_alphabetic() => (&value[..idx], Some(c)),
            _ => (value, None),
        };
        let amount: u64 = digits.parse().ok()?;
        match unit {
            None | Some('s') => Some(Self::from_seconds(amount)),
            Some('m') => Some(Self::from_minutes(amount)),
            Some('h') => Some(Self::from_hours(amount)),
            Some('d') => Some(Self::from_days(amount)),
            Some(_) => None,
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.seconds)
    }
}

impl From<std::time::Duration> for Duration {
    fn from(duration: std::time::Duration) -> Self {
        Self::from_seconds(duration.as_secs())
    }
}

impl From<Duration> for std::time::Duration {
    fn from(duration: Duration) -> Self {
        std::time::Duration::from_secs(duration.seconds)
    }
}
