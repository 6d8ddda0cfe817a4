#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/folio/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Cached acquisition of portfolio and benchmark series.
//!
//! This crate re-exports the core types, store and source implementations,
//! and provides [`SeriesService`], which answers series requests from a
//! local cache when fresh and from the remote sources otherwise, with at
//! most one network fetch in flight per key.
//!
//! # Features
//!
//! - `yahoo` - Yahoo Finance benchmark source
//! - `robinhood` - Robinhood portfolio source and token file session
//! - `cache-sqlite` - SQLite-based caching
//!
//! # Example
//!
//! ```rust,ignore
//! use folio::{SeriesService, Span, Interval, StaticSession};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> folio::Result<()> {
//!     let service = SeriesService::builder()
//!         .with_robinhood()
//!         .with_yahoo()
//!         .with_session(Arc::new(StaticSession::token("...")))
//!         .build();
//!
//!     let report = service
//!         .compare("5QR12345", Some("^GSPC"), Span::Year, Interval::Day, false)
//!         .await?;
//!     println!("{:?}", report.comparison.excess_return());
//!
//!     Ok(())
//! }
//! ```

// Core types and traits
pub use folio_core::*;

// Store implementations
#[cfg(feature = "cache-sqlite")]
pub use folio_cache::SqliteStore;
pub use folio_cache::InMemoryStore;

// Sources
#[cfg(feature = "robinhood")]
pub use folio_robinhood::{RobinhoodPortfolioSource, TokenFileSession};
#[cfg(feature = "yahoo")]
pub use folio_yahoo::YahooBenchmarkSource;

/// Portfolio versus benchmark alignment.
pub mod compare;
/// Single-flight fetch coordination.
pub mod coordinator;
/// Hit, miss or stale decisions.
pub mod policy;
/// Retry and backoff.
pub mod retry;
/// Series service and its builder.
pub mod service;

#[cfg(test)]
mod testing;

pub use compare::{Comparison, ComparisonPoint};
pub use coordinator::{FetchCoordinator, Outcome};
pub use policy::{Decision, decide};
pub use retry::RetryPolicy;
pub use service::{ComparisonReport, Origin, Series, SeriesService, SeriesServiceBuilder, ServiceConfig};
