//! In-memory cache implementation.

use async_trait::async_trait;
use folio_core::{CacheEntry, CacheKey, CacheStore, FolioError, Result, TimeSeriesRecord, TtlPolicy};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Simple in-memory store for tests and short-lived processes.
///
/// Entries live in an `RwLock`-protected `HashMap` and are lost when the
/// store is dropped. Records are cloned on get and put.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: TtlPolicy,
}

impl InMemoryStore {
    /// Create a new empty store with the default TTL table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom TTL table.
    #[must_use]
    pub fn with_ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) => {
                debug!("Cache hit for series");
                Ok(Some(entry.clone()))
            }
            None => {
                debug!("Cache miss for series");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, record), fields(key = %key, points = record.len()))]
    async fn put(&self, key: &CacheKey, record: &TimeSeriesRecord) -> Result<()> {
        if record.key() != key {
            return Err(FolioError::Cache(format!(
                "record for {} cannot be stored under {key}",
                record.key()
            )));
        }
        let mut entries = self.entries.write().await;
        entries.insert(key.clone(), CacheEntry::new(record.clone()));
        debug!("Cached {} points", record.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear(&self, key: Option<&CacheKey>) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let removed = match key {
            Some(key) => usize::from(entries.remove(key).is_some()),
            None => {
                let n = entries.len();
                entries.clear();
                n
            }
        };
        debug!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }
}
