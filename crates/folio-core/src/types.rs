//! Core data types for portfolio and benchmark series.
//!
//! This module defines the fundamental data structures:
//!
//! - [`Symbol`] - Benchmark ticker
//! - [`CacheKey`] - Exact-match identity of a cached series
//! - [`Point`] - One `(timestamp, value)` observation
//! - [`TimeSeriesRecord`] - The canonical, validated series handed to consumers
//! - [`SeriesRequest`] - A validated request coming from a command surface

use chrono::{DateTime, Utc};
use polars::prelude::{Column, DataFrame, DataType, NamedFrom, TimeUnit};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FolioError, Result};
use crate::frequency::{Interval, SourceKind, Span, validate_combination};

/// Benchmark ticker used when a comparison names none (S&P 500).
pub const DEFAULT_BENCHMARK: &str = "^GSPC";

/// A trading symbol/ticker.
///
/// Symbols are automatically uppercased on creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Creates a new symbol from a string, converting to uppercase.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_uppercase())
    }

    /// Returns the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identity of a cached series: source kind, account id or ticker, span and
/// interval. Keys only ever match exactly.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    source: SourceKind,
    identity: String,
    span: Span,
    interval: Interval,
}

impl CacheKey {
    /// Creates a key for an arbitrary source kind.
    ///
    /// Benchmark identities are normalized like [`Symbol`]; account ids are
    /// only trimmed.
    #[must_use]
    pub fn new(source: SourceKind, identity: &str, span: Span, interval: Interval) -> Self {
        let identity = match source {
            SourceKind::Portfolio => identity.trim().to_string(),
            SourceKind::Benchmark => Symbol::new(identity).0,
        };
        Self {
            source,
            identity,
            span,
            interval,
        }
    }

    /// Key for a brokerage account's equity history.
    #[must_use]
    pub fn portfolio(account: &str, span: Span, interval: Interval) -> Self {
        Self::new(SourceKind::Portfolio, account, span, interval)
    }

    /// Checks that the identity is non-empty and safe to embed as a single
    /// URL path segment: ASCII letters, digits and `^ . = - _`, excluding the
    /// dot segments `.` and `..`.
    ///
    /// # Errors
    /// Returns [`FolioError::Validation`] otherwise.
    pub fn validate_identity(&self) -> Result<()> {
        let id = self.identity.as_str();
        if id.is_empty() {
            return Err(FolioError::Validation(format!(
                "{} identity must not be empty",
                self.source
            )));
        }
        let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '^' | '.' | '=' | '-' | '_');
        if id == "." || id == ".." || !id.chars().all(allowed) {
            return Err(FolioError::Validation(format!(
                "{} identity {id:?} contains unsupported characters",
                self.source
            )));
        }
        Ok(())
    }

    /// Key for a benchmark ticker's history.
    #[must_use]
    pub fn benchmark(symbol: &Symbol, span: Span, interval: Interval) -> Self {
        Self::new(SourceKind::Benchmark, symbol.as_str(), span, interval)
    }

    /// Source kind.
    #[must_use]
    pub const fn source(&self) -> SourceKind {
        self.source
    }

    /// Account id or ticker.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Requested span.
    #[must_use]
    pub const fn span(&self) -> Span {
        self.span
    }

    /// Requested interval.
    #[must_use]
    pub const fn interval(&self) -> Interval {
        self.interval
    }

    /// Stable string encoding, unique across source kinds.
    ///
    /// The identity is length-prefixed so that separators inside it cannot
    /// make two different keys render the same way.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!(
            "{}/{}:{}/{}/{}",
            self.source,
            self.identity.len(),
            self.identity,
            self.span,
            self.interval
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.source, self.identity, self.span, self.interval
        )
    }
}

/// A single observation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Grid-aligned timestamp.
    pub timestamp: DateTime<Utc>,
    /// Observed value (equity in account currency, or index level).
    pub value: f64,
}

impl Point {
    /// Creates a new point.
    #[must_use]
    pub const fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// An ordered, validated series returned by a remote source.
///
/// Points have strictly increasing timestamps and finite values. The series
/// is non-empty unless it was explicitly built with [`TimeSeriesRecord::empty`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRecord")]
pub struct TimeSeriesRecord {
    key: CacheKey,
    fetched_at: DateTime<Utc>,
    points: Vec<Point>,
    empty: bool,
}

/// Unvalidated mirror of [`TimeSeriesRecord`] used during deserialization.
#[derive(Deserialize)]
struct RawRecord {
    key: CacheKey,
    fetched_at: DateTime<Utc>,
    points: Vec<Point>,
    empty: bool,
}

impl TryFrom<RawRecord> for TimeSeriesRecord {
    type Error = FolioError;

    fn try_from(raw: RawRecord) -> Result<Self> {
        if raw.empty {
            if !raw.points.is_empty() {
                return Err(FolioError::Data(
                    "record marked empty but carries points".to_string(),
                ));
            }
            return Ok(Self::empty(raw.key, raw.fetched_at));
        }
        Self::new(raw.key, raw.fetched_at, raw.points)
    }
}

impl TimeSeriesRecord {
    /// Creates a record, checking ordering, uniqueness and finiteness.
    ///
    /// # Errors
    /// Returns [`FolioError::Data`] if `points` is empty, contains a non-finite
    /// value, or is not strictly increasing in time.
    pub fn new(key: CacheKey, fetched_at: DateTime<Utc>, points: Vec<Point>) -> Result<Self> {
        if points.is_empty() {
            return Err(FolioError::Data(format!("no data points for {key}")));
        }
        if let Some(bad) = points.iter().find(|p| !p.value.is_finite()) {
            return Err(FolioError::Data(format!(
                "non-finite value at {} for {key}",
                bad.timestamp
            )));
        }
        if let Some(pair) = points.windows(2).find(|w| w[0].timestamp >= w[1].timestamp) {
            return Err(FolioError::Data(format!(
                "timestamps not strictly increasing at {} for {key}",
                pair[1].timestamp
            )));
        }
        Ok(Self {
            key,
            fetched_at,
            points,
            empty: false,
        })
    }

    /// Creates a record explicitly marked as an empty result.
    #[must_use]
    pub const fn empty(key: CacheKey, fetched_at: DateTime<Utc>) -> Self {
        Self {
            key,
            fetched_at,
            points: Vec::new(),
            empty: true,
        }
    }

    /// The key this record answers.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// When the record was fetched from the remote source.
    #[must_use]
    pub const fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// The observations, oldest first.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Returns true if the record was marked as an empty result.
    #[must_use]
    pub const fn is_empty_result(&self) -> bool {
        self.empty
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if there are no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Renders the series as a DataFrame with columns `timestamp`
    /// (Datetime, milliseconds since the Unix epoch, UTC) and `value`.
    ///
    /// # Errors
    /// Returns [`FolioError::Other`] if polars rejects the columns.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let millis: Vec<i64> = self
            .points
            .iter()
            .map(|p| p.timestamp.timestamp_millis())
            .collect();
        let values: Vec<f64> = self.points.iter().map(|p| p.value).collect();

        let ts_col = Column::new("timestamp".into(), millis)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, Some("UTC".into())))
            .map_err(|e| FolioError::Other(e.to_string()))?;

        DataFrame::new(vec![ts_col, Column::new("value".into(), values)])
            .map_err(|e| FolioError::Other(e.to_string()))
    }
}

/// A validated request for one series.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeriesRequest {
    key: CacheKey,
    force_refresh: bool,
}

impl SeriesRequest {
    /// Validates and builds a request.
    ///
    /// # Errors
    /// Returns [`FolioError::Validation`] for an empty or malformed identity
    /// (see [`CacheKey::validate_identity`]) or an unsupported span/interval
    /// combination.
    pub fn new(source: SourceKind, identity: &str, span: Span, interval: Interval) -> Result<Self> {
        let key = CacheKey::new(source, identity, span, interval);
        key.validate_identity()?;
        validate_combination(span, interval)?;
        Ok(Self {
            key,
            force_refresh: false,
        })
    }

    /// Portfolio history request for an account.
    ///
    /// # Errors
    /// See [`SeriesRequest::new`].
    pub fn portfolio(account: &str, span: Span, interval: Interval) -> Result<Self> {
        Self::new(SourceKind::Portfolio, account, span, interval)
    }

    /// Benchmark history request for a ticker.
    ///
    /// # Errors
    /// See [`SeriesRequest::new`].
    pub fn benchmark(symbol: &str, span: Span, interval: Interval) -> Result<Self> {
        Self::new(SourceKind::Benchmark, symbol, span, interval)
    }

    /// Parses a request from command-surface strings.
    ///
    /// # Errors
    /// Returns [`FolioError::Validation`] for unknown tokens or unsupported
    /// combinations.
    pub fn parse(source: &str, identity: &str, span: &str, interval: &str) -> Result<Self> {
        Self::new(source.parse()?, identity, span.parse()?, interval.parse()?)
    }

    /// Bypasses any cached entry.
    #[must_use]
    pub const fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    /// The cache key this request resolves to.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Whether the cache should be bypassed.
    #[must_use]
    pub const fn force_refresh(&self) -> bool {
        self.force_refresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn key() -> CacheKey {
        CacheKey::portfolio("ACCT1", Span::Week, Interval::Day)
    }

    #[test]
    fn test_symbol_uppercase() {
        assert_eq!(Symbol::new(" ^gspc ").as_str(), "^GSPC");
    }

    #[test]
    fn test_storage_key_distinguishes_source_kinds() {
        let p = CacheKey::new(SourceKind::Portfolio, "SPY", Span::Year, Interval::Day);
        let b = CacheKey::new(SourceKind::Benchmark, "SPY", Span::Year, Interval::Day);
        assert_ne!(p.storage_key(), b.storage_key());
        assert_eq!(b.storage_key(), "benchmark/3:SPY/year/day");
    }

    #[test]
    fn test_storage_key_is_collision_free_for_separators() {
        let a = CacheKey::portfolio("a/1:b", Span::Year, Interval::Day);
        let b = CacheKey::portfolio("a", Span::Year, Interval::Day);
        assert_ne!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn test_record_rejects_unordered_points() {
        let points = vec![Point::new(ts(2), 1.0), Point::new(ts(1), 2.0)];
        assert!(matches!(
            TimeSeriesRecord::new(key(), ts(3), points),
            Err(FolioError::Data(_))
        ));

        let dupes = vec![Point::new(ts(1), 1.0), Point::new(ts(1), 2.0)];
        assert!(TimeSeriesRecord::new(key(), ts(3), dupes).is_err());
    }

    #[test]
    fn test_record_rejects_non_finite_and_empty() {
        let points = vec![Point::new(ts(1), f64::NAN)];
        assert!(TimeSeriesRecord::new(key(), ts(3), points).is_err());
        assert!(TimeSeriesRecord::new(key(), ts(3), Vec::new()).is_err());

        let empty = TimeSeriesRecord::empty(key(), ts(3));
        assert!(empty.is_empty_result());
        assert!(empty.is_empty());
    }

    #[test]
    fn test_deserialization_enforces_invariants() {
        let record = TimeSeriesRecord::new(
            key(),
            ts(8),
            vec![Point::new(ts(1), 10.0), Point::new(ts(2), 11.0)],
        )
        .unwrap();
        let json = serde_json::to_string(&record).unwrap();
        let back: TimeSeriesRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["points"][1]["timestamp"] = value["points"][0]["timestamp"].clone();
        assert!(serde_json::from_value::<TimeSeriesRecord>(value).is_err());
    }

    #[test]
    fn test_to_dataframe() {
        let points = (1..=3)
            .map(|d| Point::new(ts(1) + Duration::days(d), 100.0 + d as f64))
            .collect();
        let record = TimeSeriesRecord::new(key(), ts(8), points).unwrap();
        let df = record.to_dataframe().unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(df.width(), 2);
        assert_eq!(
            df.column("timestamp").unwrap().dtype(),
            &DataType::Datetime(TimeUnit::Milliseconds, Some("UTC".into()))
        );
        assert_eq!(df.column("value").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn test_request_validation() {
        assert!(SeriesRequest::portfolio("ACCT1", Span::Week, Interval::Day).is_ok());
        assert!(matches!(
            SeriesRequest::portfolio("  ", Span::Week, Interval::Day),
            Err(FolioError::Validation(_))
        ));
        assert!(matches!(
            SeriesRequest::benchmark("^GSPC", Span::Year, Interval::FiveMinute),
            Err(FolioError::Validation(_))
        ));
        let req = SeriesRequest::parse("benchmark", "^gspc", "year", "day")
            .unwrap()
            .with_force_refresh(true);
        assert_eq!(req.key().identity(), "^GSPC");
        assert!(req.force_refresh());
        assert!(SeriesRequest::parse("benchmark", "^GSPC", "decade", "day").is_err());
    }

    #[test]
    fn test_identity_must_be_a_single_path_segment() {
        for ok in ["5QR12345", "^GSPC", "BRK.B", "EURUSD=X", "ES=F", "acct_1-a"] {
            assert!(
                SeriesRequest::portfolio(ok, Span::Week, Interval::Day).is_ok(),
                "{ok}"
            );
        }
        for bad in ["ACCT1/../OTHER", "..", ".", "a b", "a?x=1", "a#b", "a%2Fb", "é"] {
            assert!(
                matches!(
                    SeriesRequest::portfolio(bad, Span::Week, Interval::Day),
                    Err(FolioError::Validation(_))
                ),
                "{bad}"
            );
        }
        assert!(
            CacheKey::benchmark(&Symbol::new("^gspc"), Span::Year, Interval::Day)
                .validate_identity()
                .is_ok()
        );
    }
}
