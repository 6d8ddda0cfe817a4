#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/folio/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Yahoo Finance benchmark source.
//!
//! This crate provides [`YahooBenchmarkSource`], a [`SeriesSource`] that
//! fetches index and ticker closes from Yahoo Finance's chart API.
//!
//! # Features
//!
//! - `range`/`interval` chart queries matching folio's spans and intervals
//! - Built-in rate limiting (1 request per second by default)
//! - Adjusted close preferred over raw close
//! - No session required
//!
//! # Example
//!
//! ```no_run
//! use folio_yahoo::YahooBenchmarkSource;
//! use folio_core::{CacheKey, Interval, SeriesSource, SessionContext, Span, Symbol};
//!
//! # async fn example() -> folio_core::Result<()> {
//! let source = YahooBenchmarkSource::new();
//! let key = CacheKey::benchmark(&Symbol::new("^GSPC"), Span::Year, Interval::Day);
//!
//! let record = source.fetch(&SessionContext::anonymous(), &key).await?;
//! println!("Fetched {} points", record.len());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use folio_core::{
    CacheKey, FolioError, Interval, Point, Result, SeriesSource, SessionContext, SourceKind, Span,
    TimeSeriesRecord, align_to_interval,
};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, instrument};

/// Yahoo Finance chart API base URL.
const CHART_API_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Default rate limit delay in milliseconds.
const DEFAULT_RATE_LIMIT_MS: u64 = 1000;

/// User agent for HTTP requests.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

const PROVIDER: &str = "Yahoo Finance";

/// Yahoo Finance benchmark source.
///
/// Public data; [`SeriesSource::requires_session`] is false.
#[derive(Debug)]
pub struct YahooBenchmarkSource {
    client: reqwest::Client,
    base_url: String,
    rate_limit_ms: u64,
    last_request_time: AtomicU64,
}

impl YahooBenchmarkSource {
    /// Create a new Yahoo Finance source with default settings.
    ///
    /// Uses built-in rate limiting of 1 request per second.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self::with_client(client)
    }

    /// Create a new Yahoo Finance source with a custom HTTP client.
    ///
    /// Uses the provided client for all HTTP requests. Rate limiting
    /// is still applied.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: CHART_API_URL.to_string(),
            rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
            last_request_time: AtomicU64::new(0),
        }
    }

    /// Set the minimum spacing between requests.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit_ms = rate_limit.as_millis() as u64;
        self
    }

    /// Point the source at a different chart endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Apply rate limiting before making a request.
    async fn apply_rate_limit(&self) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let last = self.last_request_time.load(Ordering::Relaxed);
        let elapsed = now.saturating_sub(last);

        if elapsed < self.rate_limit_ms {
            let wait_time = self.rate_limit_ms - elapsed;
            debug!("Rate limiting: waiting {}ms", wait_time);
            sleep(Duration::from_millis(wait_time)).await;
        }

        self.last_request_time.store(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            Ordering::Relaxed,
        );
    }

    /// Build the chart API URL for a benchmark key.
    ///
    /// Callers validate the identity first, so only `^` needs escaping.
    fn build_chart_url(&self, key: &CacheKey) -> String {
        format!(
            "{}/{}?range={}&interval={}&includeAdjustedClose=true",
            self.base_url,
            key.identity().replace('^', "%5E"),
            range_token(key.span()),
            interval_token(key.interval())
        )
    }

    /// Normalize a chart response into a grid-aligned record.
    fn parse_chart_response(
        key: &CacheKey,
        response: ChartBody,
        fetched_at: DateTime<Utc>,
    ) -> Result<TimeSeriesRecord> {
        let chart = match response {
            ChartBody::Chart { chart } => chart,
            ChartBody::Finance { finance } => {
                let error = finance.error.unwrap_or_default();
                return Err(FolioError::Data(format!(
                    "{}: {}",
                    error.code, error.description
                )));
            }
        };

        if let Some(error) = chart.error {
            if error.code == "Not Found" {
                return Err(FolioError::Data(format!("unknown symbol {}", key.identity())));
            }
            return Err(FolioError::Data(format!(
                "{}: {}",
                error.code, error.description
            )));
        }

        let result = chart
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| FolioError::Data("missing chart result".to_string()))?;

        let timestamps = result.timestamp.unwrap_or_default();
        if timestamps.is_empty() {
            return Err(FolioError::Data(format!(
                "no observations for {}",
                key.identity()
            )));
        }

        let closes = result
            .indicators
            .quote
            .into_iter()
            .next()
            .map(|q| q.close)
            .unwrap_or_default();

        let adj_closes = result
            .indicators
            .adjclose
            .and_then(|ac| ac.into_iter().next())
            .map(|ac| ac.adjclose)
            .filter(|ac| ac.len() == timestamps.len());

        let values = adj_closes.unwrap_or(closes);
        if values.len() != timestamps.len() {
            return Err(FolioError::Data(format!(
                "{} timestamps but {} values",
                timestamps.len(),
                values.len()
            )));
        }

        let observations: Vec<Point> = timestamps
            .iter()
            .zip(values)
            .filter_map(|(&ts, value)| {
                let value = value.filter(|v| v.is_finite())?;
                let timestamp = Utc.timestamp_opt(ts, 0).single()?;
                Some(Point::new(timestamp, value))
            })
            .collect();

        let points = align_to_interval(observations, key.interval());
        if points.is_empty() {
            return Err(FolioError::Data(format!(
                "only null values for {}",
                key.identity()
            )));
        }

        TimeSeriesRecord::new(key.clone(), fetched_at, points)
    }
}

impl Default for YahooBenchmarkSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Chart `range` parameter for a span.
const fn range_token(span: Span) -> &'static str {
    match span {
        Span::Day => "1d",
        Span::Week => "5d",
        Span::Month => "1mo",
        Span::ThreeMonth => "3mo",
        Span::Year => "1y",
        Span::FiveYear => "5y",
        Span::All => "max",
    }
}

/// Chart `interval` parameter for an interval.
const fn interval_token(interval: Interval) -> &'static str {
    match interval {
        Interval::FiveMinute => "5m",
        Interval::Hour => "1h",
        Interval::Day => "1d",
        Interval::Week => "1wk",
    }
}

fn retry_after(response: &reqwest::Response) -> Option<&str> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
}

#[async_trait]
impl SeriesSource for YahooBenchmarkSource {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Benchmark
    }

    fn requires_session(&self) -> bool {
        false
    }

    #[instrument(skip(self, _session), fields(key = %key))]
    async fn fetch(&self, _session: &SessionContext, key: &CacheKey) -> Result<TimeSeriesRecord> {
        if key.source() != SourceKind::Benchmark {
            return Err(FolioError::Validation(format!(
                "{PROVIDER} serves benchmarks, not {}",
                key.source()
            )));
        }

        key.validate_identity()?;

        // Apply rate limiting
        self.apply_rate_limit().await;

        let url = self.build_chart_url(key);
        debug!("Fetching chart: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FolioError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FolioError::rate_limited(PROVIDER, retry_after(&response)));
        }

        // Public endpoint: a rejection here is a crumb or consent problem,
        // not a session folio can renew.
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FolioError::Data(format!(
                "HTTP {status} for {}, request rejected",
                key.identity()
            )));
        }

        if status == StatusCode::NOT_FOUND {
            return Err(FolioError::Data(format!("unknown symbol {}", key.identity())));
        }

        if status.is_client_error() {
            return Err(FolioError::Data(format!("HTTP {status} for {}", key.identity())));
        }

        if !status.is_success() {
            return Err(FolioError::Network(format!(
                "HTTP {status} for {}",
                key.identity()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FolioError::Network(e.to_string()))?;
        let chart: ChartBody =
            serde_json::from_str(&body).map_err(|e| FolioError::Data(e.to_string()))?;

        let record = Self::parse_chart_response(key, chart, Utc::now())?;
        debug!("Fetched {} points", record.len());
        Ok(record)
    }
}

// ============================================================================
// Yahoo Finance API Response Types
// ============================================================================

/// Top-level body; errors on some edges come back under `finance`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChartBody {
    Chart { chart: ChartResult },
    Finance { finance: FinanceResult },
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct FinanceResult {
    error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjClose>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    adjclose: Vec<Option<f64>>,
}
