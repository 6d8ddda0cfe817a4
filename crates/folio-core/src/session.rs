//! Session context handed to authenticated sources.
//!
//! The core never performs a login handshake. A [`SessionProvider`] supplies
//! the auth material for each fetch, and an expired or missing session is
//! reported as [`FolioError::Auth`] so the caller can re-authenticate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::{FolioError, Result};

/// Environment variable read by [`EnvSession`] by default.
pub const ACCESS_TOKEN_ENV: &str = "FOLIO_ACCESS_TOKEN";

/// Auth material for a single request.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionContext {
    access_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl SessionContext {
    /// A bearer-token session, optionally with an expiry.
    #[must_use]
    pub fn bearer(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: Some(token.into()),
            expires_at,
        }
    }

    /// A session carrying no credentials, for public sources.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            access_token: None,
            expires_at: None,
        }
    }

    /// The bearer token, if any.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Expiry of the token, if known.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns true if the session has an expiry at or before `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Returns the bearer token if the session is usable at `now`.
    ///
    /// # Errors
    /// Returns [`FolioError::Auth`] if the session is anonymous or expired.
    pub fn require_token(&self, provider: &str, now: DateTime<Utc>) -> Result<&str> {
        if self.is_expired(now) {
            return Err(FolioError::auth(provider, "session expired"));
        }
        self.access_token()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FolioError::auth(provider, "no access token"))
    }
}

/// Supplies auth material for each fetch.
#[async_trait]
pub trait SessionProvider: Send + Sync + fmt::Debug {
    /// Returns the current session.
    ///
    /// Implementations report a missing or expired session as
    /// [`FolioError::Auth`].
    async fn session(&self) -> Result<SessionContext>;
}

/// A fixed session supplied by the embedding application.
#[derive(Debug, Clone)]
pub struct StaticSession {
    context: SessionContext,
}

impl StaticSession {
    /// Wraps an existing context.
    #[must_use]
    pub const fn new(context: SessionContext) -> Self {
        Self { context }
    }

    /// A non-expiring bearer token.
    #[must_use]
    pub fn token(token: impl Into<String>) -> Self {
        Self::new(SessionContext::bearer(token, None))
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn session(&self) -> Result<SessionContext> {
        if self.context.is_expired(Utc::now()) {
            return Err(FolioError::auth("session", "session expired"));
        }
        Ok(self.context.clone())
    }
}

/// Reads a bearer token from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvSession {
    var: String,
}

impl EnvSession {
    /// Reads [`ACCESS_TOKEN_ENV`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_var(ACCESS_TOKEN_ENV)
    }

    /// Reads a custom variable.
    #[must_use]
    pub fn with_var(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionProvider for EnvSession {
    async fn session(&self) -> Result<SessionContext> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => {
                Ok(SessionContext::bearer(token.trim(), None))
            }
            _ => Err(FolioError::auth(
                "session",
                format!("{} is not set", self.var),
            )),
        }
    }
}
