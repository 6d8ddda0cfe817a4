//! Span, interval and source kind definitions.
//!
//! This module defines [`Span`] (the historical window), [`Interval`] (the
//! sampling granularity within that window) and [`SourceKind`], along with the
//! table of span/interval combinations the remote providers accept.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FolioError;

/// Which remote source a series comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Brokerage account equity history.
    Portfolio,
    /// Market benchmark (index or ticker) history.
    Benchmark,
}

impl SourceKind {
    /// Stable token used in persisted keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Portfolio => "portfolio",
            Self::Benchmark => "benchmark",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = FolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "portfolio" => Ok(Self::Portfolio),
            "benchmark" => Ok(Self::Benchmark),
            other => Err(FolioError::Validation(format!("unknown source kind '{other}'"))),
        }
    }
}

/// Total historical window requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Span {
    /// The current trading day.
    #[serde(rename = "day")]
    Day,
    /// The last week.
    #[serde(rename = "week")]
    Week,
    /// The last month.
    #[serde(rename = "month")]
    Month,
    /// The last three months.
    #[serde(rename = "3month")]
    ThreeMonth,
    /// The last year.
    #[serde(rename = "year")]
    Year,
    /// The last five years.
    #[serde(rename = "5year")]
    FiveYear,
    /// The full history.
    #[serde(rename = "all")]
    All,
}

impl Span {
    /// Every recognized span, shortest first.
    pub const ALL: [Self; 7] = [
        Self::Day,
        Self::Week,
        Self::Month,
        Self::ThreeMonth,
        Self::Year,
        Self::FiveYear,
        Self::All,
    ];

    /// Stable token used in persisted keys and provider queries.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::ThreeMonth => "3month",
            Self::Year => "year",
            Self::FiveYear => "5year",
            Self::All => "all",
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Span {
    type Err = FolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "3month" => Ok(Self::ThreeMonth),
            "year" => Ok(Self::Year),
            "5year" => Ok(Self::FiveYear),
            "all" => Ok(Self::All),
            other => Err(FolioError::Validation(format!(
                "unknown span '{other}' (expected one of day, week, month, 3month, year, 5year, all)"
            ))),
        }
    }
}

/// Sampling granularity within a span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    /// Five-minute bars.
    #[serde(rename = "5minute")]
    FiveMinute,
    /// Hourly bars.
    #[serde(rename = "hour")]
    Hour,
    /// Daily bars.
    #[serde(rename = "day")]
    Day,
    /// Weekly bars.
    #[serde(rename = "week")]
    Week,
}

impl Interval {
    /// Every recognized interval, finest first.
    pub const ALL: [Self; 4] = [Self::FiveMinute, Self::Hour, Self::Day, Self::Week];

    /// Stable token used in persisted keys and provider queries.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FiveMinute => "5minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
        }
    }

    /// Nominal distance between two grid points.
    #[must_use]
    pub fn step(&self) -> Duration {
        match self {
            Self::FiveMinute => Duration::minutes(5),
            Self::Hour => Duration::hours(1),
            Self::Day => Duration::days(1),
            Self::Week => Duration::weeks(1),
        }
    }

    /// Floors a timestamp onto this interval's grid.
    ///
    /// Intraday and daily grids are anchored at the Unix epoch in UTC; weekly
    /// buckets start on Monday 00:00 UTC.
    #[must_use]
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Week => {
                let date = ts.date_naive();
                let monday =
                    date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                monday
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| Utc.from_utc_datetime(&dt))
                    .unwrap_or(ts)
            }
            _ => {
                let step = self.step().num_seconds();
                let secs = ts.timestamp().div_euclid(step) * step;
                Utc.timestamp_opt(secs, 0).single().unwrap_or(ts)
            }
        }
    }

    /// Returns true if the remote providers can serve this interval over `span`.
    #[must_use]
    pub const fn supports(&self, span: Span) -> bool {
        use Span as S;
        match self {
            Self::FiveMinute => matches!(span, S::Day | S::Week),
            Self::Hour => matches!(span, S::Day | S::Week | S::Month),
            Self::Day => !matches!(span, S::Day),
            Self::Week => !matches!(span, S::Day | S::Week),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = FolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "5minute" | "minute" | "5m" => Ok(Self::FiveMinute),
            "hour" | "1h" => Ok(Self::Hour),
            "day" | "1d" => Ok(Self::Day),
            "week" | "1wk" => Ok(Self::Week),
            other => Err(FolioError::Validation(format!(
                "unknown interval '{other}' (expected one of 5minute, hour, day, week)"
            ))),
        }
    }
}

/// Checks that `interval` can be requested over `span`.
///
/// # Errors
/// Returns [`FolioError::Validation`] for unsupported combinations.
pub fn validate_combination(span: Span, interval: Interval) -> Result<(), FolioError> {
    if interval.supports(span) {
        Ok(())
    } else {
        Err(FolioError::Validation(format!(
            "interval '{interval}' is not available for span '{span}'"
        )))
    }
}
