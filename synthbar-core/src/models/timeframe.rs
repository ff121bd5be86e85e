use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use time::OffsetDateTime;

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 3_600;
const SECS_PER_DAY: u64 = 86_400;
const SECS_PER_WEEK: u64 = 604_800;

#[derive(Error, Debug)]
pub enum TimeframeError {
    #[error("invalid timeframe {0:?}: expected <n>s|m|h|d|w")]
    Invalid(String),

    #[error("timeframe must be a positive whole number of seconds")]
    NotPositive,

    #[error("timestamp out of range: {0}")]
    OutOfRange(#[from] time::error::ComponentRange),
}

/// A bar bucket width with canonical string form `<n>s|m|h|d|w`.
///
/// Canonicalization is bottom-up by divisibility, so `60s`, `1m` and any other
/// spelling of the same duration compare equal and print the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timeframe(Duration);

impl Timeframe {
    pub const M1: Timeframe = Timeframe(Duration::from_secs(SECS_PER_MINUTE));
    pub const M5: Timeframe = Timeframe(Duration::from_secs(5 * SECS_PER_MINUTE));
    pub const M15: Timeframe = Timeframe(Duration::from_secs(15 * SECS_PER_MINUTE));
    pub const H1: Timeframe = Timeframe(Duration::from_secs(SECS_PER_HOUR));
    pub const D1: Timeframe = Timeframe(Duration::from_secs(SECS_PER_DAY));
    pub const W1: Timeframe = Timeframe(Duration::from_secs(SECS_PER_WEEK));

    pub fn new(duration: Duration) -> Result<Self, TimeframeError> {
        if duration.is_zero() || duration.subsec_nanos() != 0 {
            return Err(TimeframeError::NotPositive);
        }
        Ok(Self(duration))
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    pub fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    /// Start of the bucket containing `event_time_ms`, aligned down to the
    /// timeframe boundary. A timestamp exactly on a boundary starts a new
    /// bucket.
    pub fn bucket_start(&self, event_time_ms: i64) -> Result<OffsetDateTime, TimeframeError> {
        let width_ms = self.0.as_millis() as i64;
        let bucket_ms = event_time_ms.div_euclid(width_ms) * width_ms;
        let start = OffsetDateTime::from_unix_timestamp_nanos(bucket_ms as i128 * 1_000_000)?;
        Ok(start)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs % SECS_PER_WEEK == 0 {
            write!(f, "{}w", secs / SECS_PER_WEEK)
        } else if secs % SECS_PER_DAY == 0 {
            write!(f, "{}d", secs / SECS_PER_DAY)
        } else if secs % SECS_PER_HOUR == 0 {
            write!(f, "{}h", secs / SECS_PER_HOUR)
        } else if secs % SECS_PER_MINUTE == 0 {
            write!(f, "{}m", secs / SECS_PER_MINUTE)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() < 2 || !s.is_ascii() {
            return Err(TimeframeError::Invalid(s.to_string()));
        }
        let (count, unit) = s.split_at(s.len() - 1);
        let count: u64 = count.parse().map_err(|_| TimeframeError::Invalid(s.to_string()))?;
        if count == 0 {
            return Err(TimeframeError::NotPositive);
        }
        let unit_secs = match unit {
            "s" => 1,
            "m" => SECS_PER_MINUTE,
            "h" => SECS_PER_HOUR,
            "d" => SECS_PER_DAY,
            "w" => SECS_PER_WEEK,
            _ => return Err(TimeframeError::Invalid(s.to_string())),
        };
        let secs = count
            .checked_mul(unit_secs)
            .ok_or_else(|| TimeframeError::Invalid(s.to_string()))?;
        Ok(Self(Duration::from_secs(secs)))
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
