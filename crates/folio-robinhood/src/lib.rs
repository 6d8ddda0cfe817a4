#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/folio/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Robinhood portfolio history source.
//!
//! This crate implements the folio-core [`SeriesSource`] trait for the
//! Robinhood portfolio historicals endpoint, plus [`TokenFileSession`], a
//! session provider backed by a saved token file.
//!
//! # Usage
//!
//! ```rust,ignore
//! use folio_robinhood::{RobinhoodPortfolioSource, TokenFileSession};
//! use folio_core::{CacheKey, Interval, SeriesSource, SessionProvider, Span};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = TokenFileSession::new("~/.config/folio/session.json").session().await?;
//!     let source = RobinhoodPortfolioSource::new();
//!
//!     let key = CacheKey::portfolio("5QR12345", Span::Year, Interval::Day);
//!     let history = source.fetch(&session, &key).await?;
//!
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_core::{
    CacheKey, FolioError, Point, Result, SeriesSource, SessionContext, SourceKind,
    TimeSeriesRecord, align_to_interval,
};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Saved-token session provider.
pub mod token;

pub use token::TokenFileSession;

/// Base URL for the Robinhood API.
const API_BASE_URL: &str = "https://api.robinhood.com";

const PROVIDER: &str = "Robinhood";

/// Robinhood portfolio history source.
///
/// Every fetch sends the session's bearer token; an anonymous or expired
/// session fails with [`FolioError::Auth`] before any request is made.
#[derive(Debug, Clone)]
pub struct RobinhoodPortfolioSource {
    client: Client,
    base_url: String,
}

impl RobinhoodPortfolioSource {
    /// Create a new Robinhood source against the public API.
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self::with_client(client)
    }

    /// Create a new Robinhood source with a custom HTTP client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: API_BASE_URL.to_string(),
        }
    }

    /// Point the source at a different API host.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the historicals URL for a portfolio key.
    ///
    /// The account id is pushed as a single escaped path segment.
    fn url(&self, key: &CacheKey) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| FolioError::Other(format!("invalid base url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| FolioError::Other(format!("base url {} cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .extend(["portfolios", "historicals", key.identity(), ""]);
        url.query_pairs_mut()
            .append_pair("span", key.span().as_str())
            .append_pair("interval", key.interval().as_str())
            .append_pair("bounds", "regular");
        Ok(url)
    }

    /// Normalize a historicals body into a grid-aligned record.
    fn parse_historicals(
        key: &CacheKey,
        body: HistoricalsBody,
        fetched_at: DateTime<Utc>,
    ) -> Result<TimeSeriesRecord> {
        let rows: Vec<(DateTime<Utc>, Option<String>)> = match body {
            HistoricalsBody::Equity { equity_historicals } => equity_historicals
                .into_iter()
                .map(|row| {
                    (
                        row.begins_at,
                        row.adjusted_close_equity.or(row.close_equity),
                    )
                })
                .collect(),
            HistoricalsBody::Legacy { historicals } => historicals
                .into_iter()
                .map(|row| (row.begins_at, row.equity))
                .collect(),
            HistoricalsBody::Error { detail } => return Err(FolioError::Data(detail)),
        };

        if rows.is_empty() {
            debug!("Account has no history for this span");
            return Ok(TimeSeriesRecord::empty(key.clone(), fetched_at));
        }

        let mut observations = Vec::with_capacity(rows.len());
        for (begins_at, value) in rows {
            let Some(value) = value else { continue };
            let value: f64 = value.trim().parse().map_err(|_| {
                FolioError::Data(format!("equity value {value:?} at {begins_at} is not a number"))
            })?;
            if value.is_finite() {
                observations.push(Point::new(begins_at, value));
            }
        }

        let points = align_to_interval(observations, key.interval());
        if points.is_empty() {
            return Err(FolioError::Data(format!(
                "no usable equity values for {}",
                key.identity()
            )));
        }

        TimeSeriesRecord::new(key.clone(), fetched_at, points)
    }
}

impl Default for RobinhoodPortfolioSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Pulls the `detail` message out of an error body, falling back to the status.
fn error_detail(status: StatusCode, text: &str) -> String {
    serde_json::from_str::<ErrorBody>(text)
        .map(|body| body.detail)
        .unwrap_or_else(|_| format!("HTTP {status}"))
}

#[async_trait]
impl SeriesSource for RobinhoodPortfolioSource {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Portfolio
    }

    #[instrument(skip(self, session), fields(key = %key))]
    async fn fetch(&self, session: &SessionContext, key: &CacheKey) -> Result<TimeSeriesRecord> {
        if key.source() != SourceKind::Portfolio {
            return Err(FolioError::Validation(format!(
                "{PROVIDER} serves portfolios, not {}",
                key.source()
            )));
        }

        key.validate_identity()?;

        let token = session.require_token(PROVIDER, Utc::now())?;
        let url = self.url(key)?;
        debug!("Robinhood request: {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FolioError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok());
            return Err(FolioError::rate_limited(PROVIDER, retry_after));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = error_detail(status, &text);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    FolioError::auth(PROVIDER, detail)
                }
                StatusCode::NOT_FOUND => {
                    FolioError::Data(format!("unknown account {}: {detail}", key.identity()))
                }
                s if s.is_client_error() => FolioError::Data(detail),
                _ => FolioError::Network(detail),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| FolioError::Network(e.to_string()))?;
        let body: HistoricalsBody =
            serde_json::from_str(&text).map_err(|e| FolioError::Data(format!("{e}: {text}")))?;

        let record = Self::parse_historicals(key, body, Utc::now())?;
        debug!("Fetched {} points", record.len());
        Ok(record)
    }
}

// ============================================================================
// Robinhood API Response Types
// ============================================================================

/// Historicals body; the shape depends on the API generation.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoricalsBody {
    Equity { equity_historicals: Vec<EquityRow> },
    Legacy { historicals: Vec<LegacyRow> },
    Error { detail: String },
}

#[derive(Debug, Deserialize)]
struct EquityRow {
    begins_at: DateTime<Utc>,
    adjusted_close_equity: Option<String>,
    close_equity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyRow {
    begins_at: DateTime<Utc>,
    equity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}
