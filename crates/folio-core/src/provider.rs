//! Remote source trait for fetching series.
//!
//! Every remote adapter implements [`SeriesSource`]. Adapters are responsible
//! for turning provider-specific response shapes into a validated,
//! grid-aligned [`TimeSeriesRecord`] and for classifying failures:
//!
//! - [`FolioError::Auth`](crate::FolioError::Auth) - session invalid or expired, never retried
//! - [`FolioError::RateLimited`](crate::FolioError::RateLimited) - retryable
//! - [`FolioError::Network`](crate::FolioError::Network) - retryable
//! - [`FolioError::Data`](crate::FolioError::Data) - malformed response, never retried

use async_trait::async_trait;
use std::fmt::Debug;

use crate::{
    error::Result,
    frequency::{Interval, SourceKind},
    session::SessionContext,
    types::{CacheKey, TimeSeriesRecord},
};

/// A remote, possibly authenticated, provider of series.
#[async_trait]
pub trait SeriesSource: Send + Sync + Debug {
    /// Returns the name of this source (e.g., "Yahoo Finance").
    fn name(&self) -> &str;

    /// Which kind of series this source produces.
    fn kind(&self) -> SourceKind;

    /// Whether [`fetch`](Self::fetch) needs an authenticated session.
    ///
    /// Public sources return false and receive
    /// [`SessionContext::anonymous`].
    fn requires_session(&self) -> bool {
        true
    }

    /// Intervals this source can serve.
    fn supported_intervals(&self) -> &[Interval] {
        &Interval::ALL
    }

    /// Fetches the series identified by `key`.
    ///
    /// The returned record answers exactly `key`, has its fetch timestamp set
    /// to the time of the call, and is aligned to `key.interval()`.
    async fn fetch(&self, session: &SessionContext, key: &CacheKey) -> Result<TimeSeriesRecord>;
}
