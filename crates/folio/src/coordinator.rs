//! Single-flight fetch coordination.
//!
//! At most one network fetch per [`CacheKey`] is in flight at any time.
//! Callers arriving while a fetch runs attach to its shared completion handle
//! and receive the same outcome. The fetch itself runs on a spawned task, so
//! a caller that stops waiting does not cancel it: the store is still
//! populated and the remaining waiters still resolve.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use folio_core::{
    CacheKey, CacheStore, FolioError, Result, SeriesSource, SessionContext, SessionProvider,
    TimeSeriesRecord,
};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;

type SharedFetch = Shared<BoxFuture<'static, Result<TimeSeriesRecord>>>;

/// How a coordinated request was answered.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Another fetch finished first; the store already held a fresh record.
    Cached(TimeSeriesRecord),
    /// Answered by a network fetch, started here or joined.
    Fetched(TimeSeriesRecord),
}

impl Outcome {
    /// The record, however it was obtained.
    #[must_use]
    pub fn into_record(self) -> TimeSeriesRecord {
        match self {
            Self::Cached(record) | Self::Fetched(record) => record,
        }
    }
}

/// Deduplicates concurrent fetches and writes results to the store.
#[derive(Clone)]
pub struct FetchCoordinator {
    store: Arc<dyn CacheStore>,
    sessions: Arc<dyn SessionProvider>,
    retry: RetryPolicy,
    in_flight: Arc<Mutex<HashMap<CacheKey, SharedFetch>>>,
}

impl fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("store", &self.store)
            .field("sessions", &self.sessions)
            .field("retry", &self.retry)
            .field(
                "in_flight",
                &self.in_flight.try_lock().map(|m| m.len()).ok(),
            )
            .finish()
    }
}

impl FetchCoordinator {
    /// Create a coordinator writing into `store`.
    pub fn new(
        store: Arc<dyn CacheStore>,
        sessions: Arc<dyn SessionProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            sessions,
            retry,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of fetches currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Obtains `key` from `source`, sharing any fetch already running.
    ///
    /// Unless `force_refresh` is set, the store is checked again under the
    /// in-flight lock so that a fetch completing just before this call is
    /// observed as [`Outcome::Cached`] rather than triggering another one.
    ///
    /// # Errors
    /// Returns the fetch outcome's error. Every caller attached to the same
    /// fetch receives an equal error.
    pub async fn fetch(
        &self,
        source: Arc<dyn SeriesSource>,
        key: &CacheKey,
        force_refresh: bool,
    ) -> Result<Outcome> {
        let shared = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(existing) = in_flight.get(key) {
                debug!(key = %key, "Attaching to in-flight fetch");
                existing.clone()
            } else {
                if !force_refresh {
                    if let Some(record) = self.fresh_in_store(key).await {
                        debug!(key = %key, "Fetch completed concurrently, serving cache");
                        return Ok(Outcome::Cached(record));
                    }
                }
                debug!(key = %key, source = source.name(), "Starting fetch");
                let shared = self.spawn_fetch(source, key.clone());
                in_flight.insert(key.clone(), shared.clone());
                shared
            }
        };

        shared.await.map(Outcome::Fetched)
    }

    async fn fresh_in_store(&self, key: &CacheKey) -> Option<TimeSeriesRecord> {
        match self.store.get(key).await {
            Ok(Some(entry)) if self.store.is_fresh(&entry, Utc::now()) => {
                Some(entry.into_record())
            }
            Ok(_) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, fetching");
                None
            }
        }
    }

    fn spawn_fetch(&self, source: Arc<dyn SeriesSource>, key: CacheKey) -> SharedFetch {
        let store = Arc::clone(&self.store);
        let sessions = Arc::clone(&self.sessions);
        let retry = self.retry.clone();
        let in_flight = Arc::clone(&self.in_flight);

        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(fetch_and_store(
                source.as_ref(),
                sessions.as_ref(),
                store.as_ref(),
                &retry,
                &key,
            ))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(FolioError::Other(format!("fetch for {key} panicked"))));

            in_flight.lock().await.remove(&key);
            outcome
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(FolioError::Other(format!("fetch task failed: {e}"))))
        }
        .boxed()
        .shared()
    }
}

/// One fetch under the retry policy, then a best-effort store write.
async fn fetch_and_store(
    source: &dyn SeriesSource,
    sessions: &dyn SessionProvider,
    store: &dyn CacheStore,
    retry: &RetryPolicy,
    key: &CacheKey,
) -> Result<TimeSeriesRecord> {
    let record = retry
        .run(|attempt| {
            debug!(key = %key, attempt, "Fetching from {}", source.name());
            fetch_once(source, sessions, key)
        })
        .await?;

    if let Err(e) = store.put(key, &record).await {
        warn!(key = %key, error = %e, "Failed to cache fetched series");
    }
    Ok(record)
}

async fn fetch_once(
    source: &dyn SeriesSource,
    sessions: &dyn SessionProvider,
    key: &CacheKey,
) -> Result<TimeSeriesRecord> {
    let session = if source.requires_session() {
        sessions.session().await?
    } else {
        SessionContext::anonymous()
    };
    let record = source.fetch(&session, key).await?;
    if record.key() != key {
        return Err(FolioError::Data(format!(
            "{} answered {} for {key}",
            source.name(),
            record.key()
        )));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, ScriptedSource};
    use folio_cache::InMemoryStore;
    use folio_core::{Interval, Span, StaticSession};
    use std::time::Duration;

    fn coordinator(store: Arc<InMemoryStore>) -> FetchCoordinator {
        FetchCoordinator::new(
            store,
            Arc::new(StaticSession::token("tok")),
            RetryPolicy::default()
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(2)),
        )
    }

    fn key() -> CacheKey {
        CacheKey::portfolio("A", Span::Week, Interval::Day)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_fetch() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(Arc::clone(&store));
        let source = Arc::new(
            ScriptedSource::portfolio([Reply::Points(7)]).with_delay(Duration::from_millis(50)),
        );

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let coordinator = coordinator.clone();
            let source: Arc<dyn SeriesSource> = source.clone();
            tasks.push(tokio::spawn(async move {
                coordinator.fetch(source, &key(), false).await
            }));
        }

        let mut records = Vec::new();
        for task in tasks {
            records.push(task.await.unwrap().unwrap().into_record());
        }

        assert_eq!(source.calls(), 1);
        assert!(records.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(coordinator.in_flight().await, 0);
        assert_eq!(store.get(&key()).await.unwrap().unwrap().record(), &records[0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_attached_callers_share_failure() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(Arc::clone(&store));
        let source = Arc::new(
            ScriptedSource::portfolio([Reply::Fail(FolioError::auth("scripted", "expired"))])
                .with_delay(Duration::from_millis(50)),
        );

        let a = {
            let (c, s) = (coordinator.clone(), source.clone());
            tokio::spawn(async move { c.fetch(s, &key(), false).await })
        };
        let b = {
            let (c, s) = (coordinator.clone(), source.clone());
            tokio::spawn(async move { c.fetch(s, &key(), false).await })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a.unwrap_err(), FolioError::auth("scripted", "expired"));
        assert_eq!(b.unwrap_err(), FolioError::auth("scripted", "expired"));
        assert_eq!(source.calls(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_fresh_store_entry_is_seen_under_lock() {
        let store = Arc::new(InMemoryStore::new());
        store.put(&key(), &crate::testing::record(&key(), 7)).await.unwrap();
        let coordinator = coordinator(Arc::clone(&store));
        let source = Arc::new(ScriptedSource::portfolio([Reply::Points(3)]));

        let outcome = coordinator.fetch(source.clone(), &key(), false).await.unwrap();
        assert!(matches!(outcome, Outcome::Cached(ref r) if r.len() == 7));
        assert_eq!(source.calls(), 0);

        let forced = coordinator.fetch(source.clone(), &key(), true).await.unwrap();
        assert!(matches!(forced, Outcome::Fetched(ref r) if r.len() == 3));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_wait_still_populates_store() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(Arc::clone(&store));
        let source = Arc::new(
            ScriptedSource::portfolio([Reply::Points(7)]).with_delay(Duration::from_millis(100)),
        );

        let waited = tokio::time::timeout(
            Duration::from_millis(10),
            coordinator.fetch(source.clone(), &key(), false),
        )
        .await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(source.calls(), 1);
        assert_eq!(coordinator.in_flight().await, 0);
        assert_eq!(store.get(&key()).await.unwrap().unwrap().record().len(), 7);
    }

    #[tokio::test]
    async fn test_panicking_source_releases_marker() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(Arc::clone(&store));
        let source = Arc::new(ScriptedSource::portfolio([Reply::Panic, Reply::Points(2)]));

        let err = coordinator.fetch(source.clone(), &key(), false).await.unwrap_err();
        assert_eq!(err.kind(), folio_core::ErrorKind::Other);
        assert_eq!(coordinator.in_flight().await, 0);

        let retried = coordinator.fetch(source.clone(), &key(), false).await.unwrap();
        assert_eq!(retried.into_record().len(), 2);
    }

    #[tokio::test]
    async fn test_session_only_requested_when_required() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(Arc::clone(&store));

        let portfolio = Arc::new(ScriptedSource::portfolio([Reply::Points(1)]));
        coordinator.fetch(portfolio.clone(), &key(), false).await.unwrap();
        assert_eq!(portfolio.sessions_seen(), vec![Some("tok".to_string())]);

        let benchmark = Arc::new(ScriptedSource::benchmark([Reply::Points(1)]));
        let bkey = CacheKey::benchmark(&folio_core::Symbol::new("SPY"), Span::Week, Interval::Day);
        coordinator.fetch(benchmark.clone(), &bkey, false).await.unwrap();
        assert_eq!(benchmark.sessions_seen(), vec![None]);
    }
}
