//! Series service: the entry point wiring sources, store and coordinator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use folio_cache::InMemoryStore;
use folio_core::{
    CacheKey, CacheStore, EnvSession, FolioError, Interval, Result, SeriesRequest, SeriesSource,
    DEFAULT_BENCHMARK, SessionProvider, SourceKind, Span, TimeSeriesRecord, TtlPolicy,
};

use crate::compare::Comparison;
use crate::coordinator::{FetchCoordinator, Outcome};
use crate::policy::{Decision, decide};
use crate::retry::RetryPolicy;

/// Where a [`Series`] came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    /// A fresh cache entry.
    Cache,
    /// A network fetch.
    Network,
    /// A stale cache entry, served because the refresh failed.
    Stale {
        /// Why the refresh failed.
        warning: FolioError,
    },
}

/// A record together with how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    record: TimeSeriesRecord,
    origin: Origin,
}

impl Series {
    fn new(record: TimeSeriesRecord, origin: Origin) -> Self {
        Self { record, origin }
    }

    fn from_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Cached(record) => Self::new(record, Origin::Cache),
            Outcome::Fetched(record) => Self::new(record, Origin::Network),
        }
    }

    /// The series.
    #[must_use]
    pub const fn record(&self) -> &TimeSeriesRecord {
        &self.record
    }

    /// Consumes self, returning the series.
    #[must_use]
    pub fn into_record(self) -> TimeSeriesRecord {
        self.record
    }

    /// Where the record came from.
    #[must_use]
    pub const fn origin(&self) -> &Origin {
        &self.origin
    }

    /// The refresh failure, if a stale record was served.
    #[must_use]
    pub fn warning(&self) -> Option<&FolioError> {
        match &self.origin {
            Origin::Stale { warning } => Some(warning),
            _ => None,
        }
    }

    /// Returns true if a stale record was served.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self.origin, Origin::Stale { .. })
    }
}

/// A comparison and the two series it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    /// The aligned, rebased rows.
    pub comparison: Comparison,
    /// The portfolio side as served.
    pub portfolio: Series,
    /// The benchmark side as served.
    pub benchmark: Series,
}

impl ComparisonReport {
    /// Refresh failures masked on either side.
    pub fn warnings(&self) -> impl Iterator<Item = &FolioError> {
        self.portfolio
            .warning()
            .into_iter()
            .chain(self.benchmark.warning())
    }
}

/// Service settings, deserializable from any serde format.
///
/// `ttl` applies to stores the builder creates itself; a store passed to
/// [`SeriesServiceBuilder::with_store`] keeps its own policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Retry and backoff for source fetches.
    pub retry: RetryPolicy,
    /// Freshness window per interval.
    pub ttl: TtlPolicy,
}

/// Answers series requests from the cache or the registered sources.
///
/// One [`SeriesSource`] may be registered per [`SourceKind`].
///
/// # Example
///
/// ```rust,ignore
/// use folio::{SeriesRequest, SeriesService, Span, Interval};
///
/// #[tokio::main]
/// async fn main() -> folio::Result<()> {
///     let service = SeriesService::builder()
///         .with_robinhood()
///         .with_yahoo()
///         .with_sqlite("folio.db")?
///         .build();
///
///     let request = SeriesRequest::portfolio("5QR12345", Span::Year, Interval::Day)?;
///     let series = service.series(&request).await?;
///     println!("{} points", series.record().len());
///
///     Ok(())
/// }
/// ```
pub struct SeriesService {
    sources: HashMap<SourceKind, Arc<dyn SeriesSource>>,
    store: Arc<dyn CacheStore>,
    coordinator: FetchCoordinator,
}

impl fmt::Debug for SeriesService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesService")
            .field(
                "sources",
                &self
                    .sources
                    .iter()
                    .map(|(kind, s)| (kind.as_str(), s.name()))
                    .collect::<Vec<_>>(),
            )
            .field("store", &self.store)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

impl SeriesService {
    /// Start configuring a service.
    #[must_use]
    pub fn builder() -> SeriesServiceBuilder {
        SeriesServiceBuilder::default()
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    fn source_for(&self, key: &CacheKey) -> Result<Arc<dyn SeriesSource>> {
        let source = self.sources.get(&key.source()).ok_or_else(|| {
            FolioError::ProviderNotConfigured(format!("No {} source registered", key.source()))
        })?;
        if !source.supported_intervals().contains(&key.interval()) {
            return Err(FolioError::Validation(format!(
                "{} does not serve {} intervals",
                source.name(),
                key.interval()
            )));
        }
        Ok(Arc::clone(source))
    }

    /// Answers `request` from the cache when fresh, otherwise from its source.
    ///
    /// A stale entry whose refresh fails is still served, marked
    /// [`Origin::Stale`]. A failed read from the store is logged and treated
    /// as a miss.
    ///
    /// # Errors
    /// Returns the fetch error when there is nothing cached to fall back to,
    /// or when the refresh was forced. Returns
    /// [`FolioError::ProviderNotConfigured`] when no source serves the key.
    #[instrument(skip(self, request), fields(key = %request.key(), force = request.force_refresh()))]
    pub async fn series(&self, request: &SeriesRequest) -> Result<Series> {
        let key = request.key();
        let source = self.source_for(key)?;

        let entry = if request.force_refresh() {
            None
        } else {
            match self.store.get(key).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Cache read failed, treating as miss");
                    None
                }
            }
        };

        let now = Utc::now();
        match decide(entry, request.force_refresh(), |e| {
            self.store.is_fresh(e, now)
        }) {
            Decision::Hit(record) => {
                debug!("Cache hit");
                Ok(Series::new(record, Origin::Cache))
            }
            Decision::Miss => {
                debug!("Cache miss");
                self.coordinator
                    .fetch(source, key, request.force_refresh())
                    .await
                    .map(Series::from_outcome)
            }
            Decision::Stale(stale) => {
                debug!("Cache entry stale, refreshing");
                match self.coordinator.fetch(source, key, false).await {
                    Ok(outcome) => Ok(Series::from_outcome(outcome)),
                    Err(e) => {
                        warn!(
                            error = %e,
                            cached_at = %stale.fetched_at(),
                            "Refresh failed, serving stale series"
                        );
                        Ok(Series::new(stale, Origin::Stale { warning: e }))
                    }
                }
            }
        }
    }

    /// Fetches an account's history and a benchmark and compares them.
    ///
    /// Both series are requested concurrently. Without a `benchmark` the
    /// comparison runs against [`DEFAULT_BENCHMARK`].
    ///
    /// # Errors
    /// Returns a validation error for bad inputs, either series' error, or
    /// the comparison's error if the two share no usable point.
    pub async fn compare(
        &self,
        account: &str,
        benchmark: Option<&str>,
        span: Span,
        interval: Interval,
        force_refresh: bool,
    ) -> Result<ComparisonReport> {
        let portfolio =
            SeriesRequest::portfolio(account, span, interval)?.with_force_refresh(force_refresh);
        let bench = SeriesRequest::benchmark(benchmark.unwrap_or(DEFAULT_BENCHMARK), span, interval)?
            .with_force_refresh(force_refresh);

        let (portfolio, benchmark) =
            tokio::try_join!(self.series(&portfolio), self.series(&bench))?;
        let comparison = Comparison::new(portfolio.record(), benchmark.record())?;

        Ok(ComparisonReport {
            comparison,
            portfolio,
            benchmark,
        })
    }

    /// Removes one cached series, or all of them.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn clear(&self, key: Option<&CacheKey>) -> Result<usize> {
        self.store.clear(key).await
    }
}

/// Store selection; the TTL table of builder-created stores is applied in
/// [`SeriesServiceBuilder::build`].
#[derive(Default)]
enum StoreChoice {
    #[default]
    InMemory,
    Custom(Arc<dyn CacheStore>),
    #[cfg(feature = "cache-sqlite")]
    Sqlite(folio_cache::SqliteStore),
}

impl StoreChoice {
    const fn describe(&self) -> &'static str {
        match self {
            Self::InMemory => "in-memory",
            Self::Custom(_) => "custom",
            #[cfg(feature = "cache-sqlite")]
            Self::Sqlite(_) => "sqlite",
        }
    }
}

/// Builder for [`SeriesService`].
#[derive(Default)]
pub struct SeriesServiceBuilder {
    sources: HashMap<SourceKind, Arc<dyn SeriesSource>>,
    store: StoreChoice,
    sessions: Option<Arc<dyn SessionProvider>>,
    config: ServiceConfig,
}

impl fmt::Debug for SeriesServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesServiceBuilder")
            .field(
                "sources",
                &self.sources.values().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("store", &self.store.describe())
            .field("sessions", &self.sessions.as_ref().map(|_| "configured"))
            .field("config", &self.config)
            .finish()
    }
}

impl SeriesServiceBuilder {
    /// Register a source for its kind, replacing any previous one.
    pub fn register_source(&mut self, source: Arc<dyn SeriesSource>) {
        debug!(
            source = source.name(),
            kind = source.kind().as_str(),
            "Registering series source"
        );
        if let Some(previous) = self.sources.insert(source.kind(), source) {
            debug!(source = previous.name(), "Replaced series source");
        }
    }

    /// Add a source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn SeriesSource>) -> Self {
        self.register_source(source);
        self
    }

    /// Use `store` for caching. Defaults to an [`InMemoryStore`].
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = StoreChoice::Custom(store);
        self
    }

    /// Use `sessions` for auth. Defaults to [`EnvSession`].
    #[must_use]
    pub fn with_session(mut self, sessions: Arc<dyn SessionProvider>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Add the Yahoo Finance benchmark source.
    #[cfg(feature = "yahoo")]
    #[must_use]
    pub fn with_yahoo(self) -> Self {
        self.with_source(Arc::new(folio_yahoo::YahooBenchmarkSource::new()))
    }

    /// Add the Robinhood portfolio source.
    #[cfg(feature = "robinhood")]
    #[must_use]
    pub fn with_robinhood(self) -> Self {
        self.with_source(Arc::new(folio_robinhood::RobinhoodPortfolioSource::new()))
    }

    /// Cache in a SQLite database at `path`.
    ///
    /// The store judges freshness with the TTLs configured when
    /// [`build`](Self::build) runs, whatever the call order.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    #[cfg(feature = "cache-sqlite")]
    pub fn with_sqlite(mut self, path: impl AsRef<std::path::Path>) -> Result<Self> {
        self.store = StoreChoice::Sqlite(folio_cache::SqliteStore::new(path)?);
        Ok(self)
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> SeriesService {
        let ttl = self.config.ttl;
        let store: Arc<dyn CacheStore> = match self.store {
            StoreChoice::InMemory => Arc::new(InMemoryStore::new().with_ttl_policy(ttl)),
            StoreChoice::Custom(store) => store,
            #[cfg(feature = "cache-sqlite")]
            StoreChoice::Sqlite(store) => Arc::new(store.with_ttl_policy(ttl)),
        };
        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(EnvSession::new()));
        let coordinator = FetchCoordinator::new(Arc::clone(&store), sessions, self.config.retry);

        SeriesService {
            sources: self.sources,
            store,
            coordinator,
        }
    }
}
