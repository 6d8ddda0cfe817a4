//! SQLite-based cache implementation.

use async_trait::async_trait;
use chrono::DateTime;
use folio_core::{CacheEntry, CacheKey, CacheStore, FolioError, Result, TimeSeriesRecord, TtlPolicy};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

fn cache_err(e: impl ToString) -> FolioError {
    FolioError::Cache(e.to_string())
}

/// SQLite-based store for series.
///
/// One row per [`CacheKey`], keyed by the four key components, holding the
/// JSON-encoded record. Data persists across application restarts. Rows that
/// cannot be decoded are logged, deleted and reported as a miss.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    ttl: TtlPolicy,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(cache_err)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory SQLite store.
    ///
    /// Useful for testing; data is lost when the store is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(cache_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            ttl: TtlPolicy::default(),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Use a custom TTL table.
    #[must_use]
    pub fn with_ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    /// Initialize the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(cache_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS series_cache (
                source TEXT NOT NULL,
                identity TEXT NOT NULL,
                span TEXT NOT NULL,
                interval_token TEXT NOT NULL,
                cached_at TEXT NOT NULL,
                record_json TEXT NOT NULL,
                PRIMARY KEY (source, identity, span, interval_token)
            )",
            [],
        )
        .map_err(cache_err)?;

        debug!("SQLite cache schema initialized");
        Ok(())
    }

    /// Number of stored rows, including ones that may turn out corrupt.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn row_count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(cache_err)?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM series_cache", [], |row| row.get(0))
            .map_err(cache_err)?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    /// Decodes a stored row, checking it still answers `key`.
    fn decode(key: &CacheKey, cached_at: &str, json: &str) -> Result<CacheEntry> {
        DateTime::parse_from_rfc3339(cached_at)
            .map_err(|e| FolioError::CacheCorrupt(format!("cached_at: {e}")))?;
        let record: TimeSeriesRecord = serde_json::from_str(json)
            .map_err(|e| FolioError::CacheCorrupt(format!("record: {e}")))?;
        if record.key() != key {
            return Err(FolioError::CacheCorrupt(format!(
                "row for {key} holds a record for {}",
                record.key()
            )));
        }
        Ok(CacheEntry::new(record))
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let conn = self.conn.lock().map_err(cache_err)?;

        let row = conn
            .query_row(
                "SELECT cached_at, record_json FROM series_cache
                 WHERE source = ?1 AND identity = ?2 AND span = ?3 AND interval_token = ?4",
                params![
                    key.source().as_str(),
                    key.identity(),
                    key.span().as_str(),
                    key.interval().as_str()
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional();

        let (cached_at, json) = match row {
            Ok(Some(row)) => row,
            Ok(None) => {
                debug!("No cached series found");
                return Ok(None);
            }
            // A column of the wrong type is a corrupt row, not a backend failure.
            Err(rusqlite::Error::FromSqlConversionFailure(..))
            | Err(rusqlite::Error::InvalidColumnType(..)) => {
                (String::new(), String::new())
            }
            Err(e) => return Err(cache_err(e)),
        };

        match Self::decode(key, &cached_at, &json) {
            Ok(entry) => {
                debug!("Found cached series with {} points", entry.record().len());
                Ok(Some(entry))
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable cache entry");
                conn.execute(
                    "DELETE FROM series_cache
                     WHERE source = ?1 AND identity = ?2 AND span = ?3 AND interval_token = ?4",
                    params![
                        key.source().as_str(),
                        key.identity(),
                        key.span().as_str(),
                        key.interval().as_str()
                    ],
                )
                .map_err(cache_err)?;
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
        let json = serde_json::to_string(record).map_err(cache_err)?;
        let cached_at = record.fetched_at().to_rfc3339();

        let conn = self.conn.lock().map_err(cache_err)?;
        conn.execute(
            "INSERT OR REPLACE INTO series_cache
             (source, identity, span, interval_token, cached_at, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key.source().as_str(),
                key.identity(),
                key.span().as_str(),
                key.interval().as_str(),
                cached_at,
                json
            ],
        )
        .map_err(cache_err)?;

        debug!("Cached {} points", record.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear(&self, key: Option<&CacheKey>) -> Result<usize> {
        let conn = self.conn.lock().map_err(cache_err)?;

        let removed = match key {
            Some(key) => conn
                .execute(
                    "DELETE FROM series_cache
                     WHERE source = ?1 AND identity = ?2 AND span = ?3 AND interval_token = ?4",
                    params![
                        key.source().as_str(),
                        key.identity(),
                        key.span().as_str(),
                        key.interval().as_str()
                    ],
                )
                .map_err(cache_err)?,
            None => conn
                .execute("DELETE FROM series_cache", [])
                .map_err(cache_err)?,
        };

        debug!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use folio_core::{Interval, Point, Span, Symbol};

    fn record(key: &CacheKey, days: i64) -> TimeSeriesRecord {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let points = (0..days)
            .map(|d| Point::new(start + Duration::days(d), 100.0 + d as f64))
            .collect();
        TimeSeriesRecord::new(key.clone(), start + Duration::days(days), points).unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_store_initialization() {
        let store = SqliteStore::in_memory();
        assert!(store.is_ok());
    }

    #[tokio::test]
    async fn test_put_then_get_returns_equal_record() {
        let store = SqliteStore::in_memory().unwrap();
        let key = CacheKey::portfolio("ACCT1", Span::Week, Interval::Day);

        assert!(store.get(&key).await.unwrap().is_none());

        let rec = record(&key, 7);
        store.put(&key, &rec).await.unwrap();

        let entry = store.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.record(), &rec);
        assert_eq!(entry.cached_at(), rec.fetched_at());
    }

    #[tokio::test]
    async fn test_source_kinds_share_store_without_collision() {
        let store = SqliteStore::in_memory().unwrap();
        let portfolio = CacheKey::portfolio("SPY", Span::Year, Interval::Day);
        let benchmark = CacheKey::benchmark(&Symbol::new("SPY"), Span::Year, Interval::Day);

        store.put(&portfolio, &record(&portfolio, 3)).await.unwrap();
        store.put(&benchmark, &record(&benchmark, 5)).await.unwrap();

        assert_eq!(store.get(&portfolio).await.unwrap().unwrap().record().len(), 3);
        assert_eq!(store.get(&benchmark).await.unwrap().unwrap().record().len(), 5);
        assert_eq!(store.row_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("series.db");
        let key = CacheKey::portfolio("ACCT1", Span::Month, Interval::Day);
        let rec = record(&key, 20);

        {
            let store = SqliteStore::new(&path).unwrap();
            store.put(&key, &rec).await.unwrap();
        }

        let reopened = SqliteStore::new(&path).unwrap();
        let entry = reopened.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.record(), &rec);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_discarded_as_miss() {
        let store = SqliteStore::in_memory().unwrap();
        let key = CacheKey::portfolio("ACCT1", Span::Week, Interval::Day);
        store.put(&key, &record(&key, 7)).await.unwrap();

        {
            let conn = store.conn.lock().unwrap();
            conn.execute("UPDATE series_cache SET record_json = '{not json'", [])
                .unwrap();
        }

        assert!(store.get(&key).await.unwrap().is_none());
        assert_eq!(store.row_count().unwrap(), 0);

        // The key is usable again after self-healing.
        store.put(&key, &record(&key, 2)).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().unwrap().record().len(), 2);
    }

    #[tokio::test]
    async fn test_row_violating_record_invariants_is_discarded() {
        let store = SqliteStore::in_memory().unwrap();
        let key = CacheKey::portfolio("ACCT1", Span::Week, Interval::Day);
        store.put(&key, &record(&key, 3)).await.unwrap();

        {
            let conn = store.conn.lock().unwrap();
            let json: String = conn
                .query_row("SELECT record_json FROM series_cache", [], |r| r.get(0))
                .unwrap();
            let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
            value["points"] = serde_json::json!([]);
            conn.execute(
                "UPDATE series_cache SET record_json = ?1",
                params![value.to_string()],
            )
            .unwrap();
        }

        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_one_and_all() {
        let store = SqliteStore::in_memory().unwrap();
        let a = CacheKey::portfolio("A", Span::Week, Interval::Day);
        let b = CacheKey::benchmark(&Symbol::new("^GSPC"), Span::Week, Interval::Day);
        store.put(&a, &record(&a, 7)).await.unwrap();
        store.put(&b, &record(&b, 5)).await.unwrap();

        assert_eq!(store.clear(Some(&a)).await.unwrap(), 1);
        assert!(store.get(&a).await.unwrap().is_none());
        assert!(store.get(&b).await.unwrap().is_some());

        assert_eq!(store.clear(None).await.unwrap(), 1);
        assert_eq!(store.row_count().unwrap(), 0);
    }
}
