//! Portfolio versus benchmark performance on a common timeline.

use chrono::{DateTime, Utc};
use folio_core::{CacheKey, FolioError, Result, SourceKind, TimeSeriesRecord};
use polars::prelude::{Column, DataFrame, DataType, NamedFrom, TimeUnit};
use serde::{Deserialize, Serialize};

/// One row of a [`Comparison`], both values indexed to 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparisonPoint {
    /// Portfolio timestamp.
    pub timestamp: DateTime<Utc>,
    /// Portfolio performance.
    pub portfolio: f64,
    /// Benchmark performance as of `timestamp`.
    pub benchmark: f64,
}

/// A portfolio and a benchmark rebased to 100 at their first common point.
///
/// The portfolio's timestamps form the timeline. Each is paired with the most
/// recent benchmark observation at or before it, so a benchmark that did not
/// trade on a given day carries its previous close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    portfolio: CacheKey,
    benchmark: CacheKey,
    points: Vec<ComparisonPoint>,
}

impl Comparison {
    /// Aligns `portfolio` against `benchmark`.
    ///
    /// # Errors
    /// Returns [`FolioError::Validation`] if the records are not a portfolio
    /// and a benchmark over the same span and interval, and
    /// [`FolioError::Data`] if they share no usable point.
    pub fn new(portfolio: &TimeSeriesRecord, benchmark: &TimeSeriesRecord) -> Result<Self> {
        let (pk, bk) = (portfolio.key(), benchmark.key());
        if pk.source() != SourceKind::Portfolio || bk.source() != SourceKind::Benchmark {
            return Err(FolioError::Validation(format!(
                "expected a portfolio and a benchmark, got {} and {}",
                pk.source(),
                bk.source()
            )));
        }
        if pk.span() != bk.span() || pk.interval() != bk.interval() {
            return Err(FolioError::Validation(format!(
                "cannot compare {pk} with {bk}"
            )));
        }

        let bench = benchmark.points();
        let mut cursor = 0;
        let mut paired = Vec::with_capacity(portfolio.len());
        for p in portfolio.points() {
            while cursor < bench.len() && bench[cursor].timestamp <= p.timestamp {
                cursor += 1;
            }
            if cursor > 0 {
                paired.push((p.timestamp, p.value, bench[cursor - 1].value));
            }
        }

        // Rebase at the first row where both sides are non-zero.
        let start = paired
            .iter()
            .position(|&(_, pv, bv)| pv != 0.0 && bv != 0.0)
            .ok_or_else(|| {
                FolioError::Data(format!("{} and {} share no usable point", pk, bk))
            })?;
        let (_, p0, b0) = paired[start];

        let points = paired[start..]
            .iter()
            .map(|&(timestamp, pv, bv)| ComparisonPoint {
                timestamp,
                portfolio: pv * 100.0 / p0,
                benchmark: bv * 100.0 / b0,
            })
            .collect();

        Ok(Self {
            portfolio: pk.clone(),
            benchmark: bk.clone(),
            points,
        })
    }

    /// Key of the portfolio side.
    #[must_use]
    pub const fn portfolio_key(&self) -> &CacheKey {
        &self.portfolio
    }

    /// Key of the benchmark side.
    #[must_use]
    pub const fn benchmark_key(&self) -> &CacheKey {
        &self.benchmark
    }

    /// The aligned rows.
    #[must_use]
    pub fn points(&self) -> &[ComparisonPoint] {
        &self.points
    }

    /// Portfolio minus benchmark performance at the last row, in index points.
    #[must_use]
    pub fn excess_return(&self) -> Option<f64> {
        self.points.last().map(|p| p.portfolio - p.benchmark)
    }

    /// Columns `timestamp`, `portfolio` and `benchmark`.
    ///
    /// # Errors
    /// Returns an error if the frame cannot be assembled.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let timestamps: Vec<i64> = self
            .points
            .iter()
            .map(|p| p.timestamp.timestamp_millis())
            .collect();
        let portfolio: Vec<f64> = self.points.iter().map(|p| p.portfolio).collect();
        let benchmark: Vec<f64> = self.points.iter().map(|p| p.benchmark).collect();

        let ts_col = Column::new("timestamp".into(), timestamps)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, Some("UTC".into())))
            .map_err(|e| FolioError::Other(e.to_string()))?;

        DataFrame::new(vec![
            ts_col,
            Column::new("portfolio".into(), portfolio),
            Column::new("benchmark".into(), benchmark),
        ])
        .map_err(|e| FolioError::Other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use folio_core::{Interval, Point, Span, Symbol};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn series(key: CacheKey, points: &[(i64, f64)]) -> TimeSeriesRecord {
        let points = points.iter().map(|&(d, v)| Point::new(day(d), v)).collect();
        TimeSeriesRecord::new(key, Utc::now(), points).unwrap()
    }

    fn keys() -> (CacheKey, CacheKey) {
        (
            CacheKey::portfolio("A", Span::Month, Interval::Day),
            CacheKey::benchmark(&Symbol::new("^GSPC"), Span::Month, Interval::Day),
        )
    }

    #[test]
    fn test_indexes_both_sides_to_100() {
        let (pk, bk) = keys();
        let portfolio = series(pk, &[(0, 1000.0), (1, 1100.0), (2, 1050.0)]);
        let benchmark = series(bk, &[(0, 4000.0), (1, 4200.0), (2, 4400.0)]);

        let cmp = Comparison::new(&portfolio, &benchmark).unwrap();
        let rows: Vec<(f64, f64)> = cmp.points().iter().map(|p| (p.portfolio, p.benchmark)).collect();
        assert_eq!(rows, vec![(100.0, 100.0), (110.0, 105.0), (105.0, 110.0)]);
        assert_eq!(cmp.excess_return(), Some(-5.0));
    }

    #[test]
    fn test_benchmark_gaps_carry_previous_close() {
        let (pk, bk) = keys();
        // Benchmark missing day 1 and starting after the portfolio.
        let portfolio = series(pk, &[(0, 50.0), (1, 100.0), (2, 110.0), (3, 120.0)]);
        let benchmark = series(bk, &[(1, 10.0), (3, 12.0)]);

        let cmp = Comparison::new(&portfolio, &benchmark).unwrap();
        assert_eq!(cmp.points().len(), 3);
        assert_eq!(cmp.points()[0].timestamp, day(1));
        assert_eq!(cmp.points()[1].benchmark, 100.0);
        assert_eq!(cmp.points()[2].benchmark, 120.0);
    }

    #[test]
    fn test_mismatched_interval_is_rejected() {
        let pk = CacheKey::portfolio("A", Span::Month, Interval::Day);
        let bk = CacheKey::benchmark(&Symbol::new("SPY"), Span::Month, Interval::Hour);
        let err = Comparison::new(&series(pk, &[(0, 1.0)]), &series(bk, &[(0, 1.0)])).unwrap_err();
        assert_eq!(err.kind(), folio_core::ErrorKind::Validation);
    }

    #[test]
    fn test_no_overlap_is_data_error() {
        let (pk, bk) = keys();
        let portfolio = series(pk, &[(0, 1.0), (1, 2.0)]);
        let benchmark = series(bk, &[(5, 10.0)]);
        let err = Comparison::new(&portfolio, &benchmark).unwrap_err();
        assert_eq!(err.kind(), folio_core::ErrorKind::Data);
    }

    #[test]
    fn test_to_dataframe_columns() {
        let (pk, bk) = keys();
        let cmp = Comparison::new(
            &series(pk, &[(0, 1.0), (1, 2.0)]),
            &series(bk, &[(0, 1.0), (1, 1.5)]),
        )
        .unwrap();
        let df = cmp.to_dataframe().unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 3);
        for name in ["timestamp", "portfolio", "benchmark"] {
            assert!(df.column(name).is_ok(), "missing {name}");
        }
        assert_eq!(
            df.column("timestamp").unwrap().dtype(),
            &DataType::Datetime(TimeUnit::Milliseconds, Some("UTC".into()))
        );
    }
}
