//! Error types for series acquisition and caching.
//!
//! This module defines [`FolioError`] which covers every failure that can occur
//! while validating a request, fetching from a remote source, or reading and
//! writing the local cache.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while acquiring or caching a series.
///
/// The type is `Clone` so that a single fetch outcome can be handed to every
/// caller waiting on the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FolioError {
    /// The request was rejected before any cache or network activity.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The session is missing, invalid or expired.
    #[error("Authentication failed for {provider}: {message}")]
    Auth {
        /// The provider that rejected the session.
        provider: String,
        /// Provider supplied detail.
        message: String,
    },

    /// Rate limit exceeded by a provider.
    #[error("Rate limited by {provider}: retry after {retry_after:?}")]
    RateLimited {
        /// The provider that rate limited the request.
        provider: String,
        /// Suggested time to wait before retrying.
        retry_after: Option<Duration>,
    },

    /// Network-related errors (connection failures, timeouts, 5xx, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered with a malformed or unexpected response.
    #[error("Data error: {0}")]
    Data(String),

    /// The retry budget was exhausted.
    #[error("Fetch failed after {attempts} attempt(s): {last}")]
    FetchFailed {
        /// Number of attempts made.
        attempts: u32,
        /// The error returned by the final attempt.
        last: Box<FolioError>,
    },

    /// A persisted cache entry could not be read back.
    #[error("Cache entry corrupt: {0}")]
    CacheCorrupt(String),

    /// Error interacting with the cache backend.
    #[error("Cache error: {0}")]
    Cache(String),

    /// No source is registered for the requested kind.
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

/// Discriminant of a [`FolioError`], without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`FolioError::Validation`].
    Validation,
    /// See [`FolioError::Auth`].
    Auth,
    /// See [`FolioError::RateLimited`].
    RateLimited,
    /// See [`FolioError::Network`].
    Network,
    /// See [`FolioError::Data`].
    Data,
    /// See [`FolioError::FetchFailed`].
    FetchFailed,
    /// See [`FolioError::CacheCorrupt`].
    CacheCorrupt,
    /// See [`FolioError::Cache`].
    Cache,
    /// See [`FolioError::ProviderNotConfigured`].
    ProviderNotConfigured,
    /// See [`FolioError::Other`].
    Other,
}

impl FolioError {
    /// Builds an [`FolioError::Auth`] error.
    pub fn auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Builds a [`FolioError::RateLimited`] error from a raw `Retry-After`
    /// header value. See [`parse_retry_after`].
    pub fn rate_limited(provider: impl Into<String>, retry_after: Option<&str>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            retry_after: retry_after.and_then(|v| parse_retry_after(v, Utc::now())),
        }
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Network(_) => ErrorKind::Network,
            Self::Data(_) => ErrorKind::Data,
            Self::FetchFailed { .. } => ErrorKind::FetchFailed,
            Self::CacheCorrupt(_) => ErrorKind::CacheCorrupt,
            Self::Cache(_) => ErrorKind::Cache,
            Self::ProviderNotConfigured(_) => ErrorKind::ProviderNotConfigured,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Returns true for transient failures worth another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network(_))
    }

    /// For [`FolioError::FetchFailed`], the kind of the underlying cause;
    /// otherwise the kind of this error.
    #[must_use]
    pub fn last_cause_kind(&self) -> ErrorKind {
        match self {
            Self::FetchFailed { last, .. } => last.last_cause_kind(),
            other => other.kind(),
        }
    }

    /// Message suitable for a front end.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth { provider, .. } => {
                format!("Your {provider} session has expired. Please log in again.")
            }
            Self::Validation(msg) => format!("Usage error: {msg}"),
            Self::FetchFailed { .. } | Self::RateLimited { .. } | Self::Network(_) => {
                "Data is temporarily unavailable. Please try again later.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Parses a `Retry-After` value given either as delta-seconds or as an HTTP
/// date. A date already in the past yields a zero wait.
#[must_use]
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Result type alias using [`FolioError`].
pub type Result<T> = std::result::Result<T, FolioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(FolioError::Network("reset".into()).is_retryable());
        assert!(
            FolioError::RateLimited {
                provider: "x".into(),
                retry_after: None
            }
            .is_retryable()
        );
        assert!(!FolioError::auth("x", "expired").is_retryable());
        assert!(!FolioError::Data("bad json".into()).is_retryable());
        assert!(!FolioError::Validation("span".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_forms() {
        let now = DateTime::parse_from_rfc3339("2015-10-21T07:27:30Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_retry_after(" 7 ", now), Some(Duration::from_secs(7)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
        assert_eq!(parse_retry_after("-3", now), None);

        assert_eq!(
            FolioError::rate_limited("x", Some("12")),
            FolioError::RateLimited {
                provider: "x".into(),
                retry_after: Some(Duration::from_secs(12)),
            }
        );
        assert!(matches!(
            FolioError::rate_limited("x", None),
            FolioError::RateLimited { retry_after: None, .. }
        ));
    }

    #[test]
    fn test_fetch_failed_carries_last_cause() {
        let err = FolioError::FetchFailed {
            attempts: 3,
            last: Box::new(FolioError::Network("timeout".into())),
        };
        assert_eq!(err.kind(), ErrorKind::FetchFailed);
        assert_eq!(err.last_cause_kind(), ErrorKind::Network);
        assert!(err.to_string().contains("3 attempt(s)"));
    }

    #[test]
    fn test_user_messages() {
        assert!(
            FolioError::auth("Robinhood", "401")
                .user_message()
                .contains("log in again")
        );
        assert!(
            FolioError::Validation("bad span".into())
                .user_message()
                .starts_with("Usage error")
        );
    }
}
