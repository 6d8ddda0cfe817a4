//! Cache hit, miss or stale decision.

use folio_core::{CacheEntry, TimeSeriesRecord};

/// What to do with a request given the current cache entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Serve the cached record without touching the network.
    Hit(TimeSeriesRecord),
    /// Fetch; there is nothing to fall back to.
    Miss,
    /// Fetch, but serve this record if the refresh fails.
    Stale(TimeSeriesRecord),
}

/// Decides how to answer a request.
///
/// A forced refresh is always a miss, even when an entry exists.
pub fn decide(
    entry: Option<CacheEntry>,
    force_refresh: bool,
    is_fresh: impl FnOnce(&CacheEntry) -> bool,
) -> Decision {
    if force_refresh {
        return Decision::Miss;
    }
    match entry {
        None => Decision::Miss,
        Some(entry) if is_fresh(&entry) => Decision::Hit(entry.into_record()),
        Some(entry) => Decision::Stale(entry.into_record()),
    }
}
