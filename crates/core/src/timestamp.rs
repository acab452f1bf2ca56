//! Storage instants
//!
//! A [`Timestamp`] counts microseconds since the Unix epoch. Storage stamps
//! every commit and every memento with one, bumping by a microsecond when the
//! clock has not moved, so versions taken within one second still sort.
//! Wire renderings (RFC 1123, memento labels) live in [`crate::memento`].

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// 1970-01-01T00:00:00Z
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Wall-clock now; epoch if the system clock reads earlier
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(elapsed.as_micros() as u64)
    }

    /// From microseconds since the epoch
    pub const fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    /// From whole seconds since the epoch
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000))
    }

    /// Microseconds since the epoch
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Whole seconds, truncated
    pub const fn as_secs(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Microseconds past the whole second
    pub const fn subsec_micros(&self) -> u32 {
        (self.0 % 1_000_000) as u32
    }

    /// Same second, zero microseconds
    ///
    /// Datetime negotiation compares at this precision.
    pub const fn truncate_to_secs(&self) -> Self {
        Timestamp::from_secs(self.as_secs())
    }

    /// One microsecond later
    pub const fn next(&self) -> Self {
        Timestamp(self.0.saturating_add(1))
    }

    /// `self + duration`, saturating; used for transaction deadlines
    pub fn saturating_add(&self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration.as_micros() as u64))
    }

    /// `self - duration`, stopping at epoch
    pub fn saturating_sub(&self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_sub(duration.as_micros() as u64))
    }

    /// Strictly earlier
    pub fn is_before(&self, other: Timestamp) -> bool {
        self < &other
    }

    /// Strictly later
    pub fn is_after(&self, other: Timestamp) -> bool {
        self > &other
    }

    /// UTC datetime; instants past chrono's range clamp to its maximum
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = self.as_secs().min(i64::MAX as u64) as i64;
        Utc.timestamp_opt(secs, self.subsec_micros() * 1_000)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// From a parsed datetime; anything before the epoch becomes the epoch
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        u64::try_from(dt.timestamp_micros()).map_or(Timestamp::EPOCH, Timestamp)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:06}", self.as_secs(), self.subsec_micros())
    }
}
