//! Cache trait for storing fetched series.
//!
//! This module defines the [`CacheStore`] trait that every backend implements,
//! the [`CacheEntry`] it hands back, and the [`TtlPolicy`] used to decide
//! whether an entry is still fresh.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::{error::Result, frequency::Interval, types::CacheKey, types::TimeSeriesRecord};

/// Time-to-live per interval, in seconds.
///
/// Finer intervals go stale sooner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    /// TTL for five-minute series.
    pub five_minute_secs: u64,
    /// TTL for hourly series.
    pub hour_secs: u64,
    /// TTL for daily series.
    pub day_secs: u64,
    /// TTL for weekly series.
    pub week_secs: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            five_minute_secs: 60,
            hour_secs: 15 * 60,
            day_secs: 6 * 60 * 60,
            week_secs: 24 * 60 * 60,
        }
    }
}

impl TtlPolicy {
    /// Applies the same TTL to every interval.
    #[must_use]
    pub const fn uniform(secs: u64) -> Self {
        Self {
            five_minute_secs: secs,
            hour_secs: secs,
            day_secs: secs,
            week_secs: secs,
        }
    }

    /// TTL for series sampled at `interval`.
    #[must_use]
    pub fn ttl(&self, interval: Interval) -> Duration {
        let secs = match interval {
            Interval::FiveMinute => self.five_minute_secs,
            Interval::Hour => self.hour_secs,
            Interval::Day => self.day_secs,
            Interval::Week => self.week_secs,
        };
        // TimeDelta is bounded by i64::MAX milliseconds.
        let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
        Duration::seconds(secs)
    }
}

/// A cached record with its freshness timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    record: TimeSeriesRecord,
    cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Wraps a record; freshness is taken from the record's fetch time.
    #[must_use]
    pub fn new(record: TimeSeriesRecord) -> Self {
        let cached_at = record.fetched_at();
        Self { record, cached_at }
    }

    /// The cached record.
    #[must_use]
    pub const fn record(&self) -> &TimeSeriesRecord {
        &self.record
    }

    /// Consumes the entry and returns the record.
    #[must_use]
    pub fn into_record(self) -> TimeSeriesRecord {
        self.record
    }

    /// When the entry was produced.
    #[must_use]
    pub const fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Returns true while `now - cached_at < ttl`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.cached_at) < ttl
    }
}

/// Persistent key to record mapping with freshness metadata.
///
/// Implementations replace entries whole, never partially, and treat
/// unreadable persisted data as a miss.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Retrieves the entry for `key` regardless of freshness.
    ///
    /// Returns `Ok(None)` when nothing usable is stored.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Stores `record` under `key`, replacing any existing entry atomically.
    async fn put(&self, key: &CacheKey, record: &TimeSeriesRecord) -> Result<()>;

    /// Removes the entry for `key`, or every entry when `key` is `None`.
    ///
    /// Returns the number of entries removed.
    async fn clear(&self, key: Option<&CacheKey>) -> Result<usize>;

    /// The TTL table this store judges freshness with.
    fn ttl_policy(&self) -> &TtlPolicy;

    /// Returns true if `entry` is still fresh at `now`.
    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        entry.is_fresh(now, self.ttl_policy().ttl(entry.record().key().interval()))
    }
}
