#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/folio/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for portfolio and benchmark series acquisition.
//!
//! This crate provides the foundational abstractions:
//!
//! - [`SeriesSource`](provider::SeriesSource) - Remote source adapter
//! - [`CacheStore`](cache::CacheStore) - Key to record store with freshness metadata
//! - [`SessionProvider`](session::SessionProvider) - Auth material for each fetch
//! - [`TimeSeriesRecord`](types::TimeSeriesRecord) - The canonical series unit

/// Interval grid alignment.
pub mod align;
/// Cache trait and entry types.
pub mod cache;
/// Error types for acquisition and caching.
pub mod error;
/// Span, interval and source kind definitions.
pub mod frequency;
/// Remote source trait.
pub mod provider;
/// Session context and providers.
pub mod session;
/// Core data types (CacheKey, TimeSeriesRecord, etc.).
pub mod types;

// Re-export commonly used items at crate root
pub use align::align_to_interval;
pub use cache::{CacheEntry, CacheStore, TtlPolicy};
pub use error::{ErrorKind, FolioError, Result, parse_retry_after};
pub use frequency::{Interval, SourceKind, Span, validate_combination};
pub use provider::SeriesSource;
pub use session::{EnvSession, SessionContext, SessionProvider, StaticSession};
pub use types::{CacheKey, DEFAULT_BENCHMARK, Point, SeriesRequest, Symbol, TimeSeriesRecord};
