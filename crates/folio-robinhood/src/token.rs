//! Session provider backed by a saved token file.
//!
//! The file is JSON `{"access_token": "...", "expires_at": "<rfc3339>"}`
//! and is written owner-only on Unix.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_core::{FolioError, Result, SessionContext, SessionProvider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

const PROVIDER: &str = "Robinhood";

#[derive(Serialize, Deserialize)]
struct TokenFile {
    access_token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// Reads the session from a token file on every call.
#[derive(Debug, Clone)]
pub struct TokenFileSession {
    path: PathBuf,
}

impl TokenFileSession {
    /// Use the token file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the token file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `context` to the token file, replacing any previous session.
    ///
    /// # Errors
    /// Returns [`FolioError::Validation`] for an anonymous context and
    /// [`FolioError::Other`] if the file cannot be written.
    #[instrument(skip(self, context), fields(path = %self.path.display()))]
    pub async fn save(&self, context: &SessionContext) -> Result<()> {
        let access_token = context
            .access_token()
            .ok_or_else(|| FolioError::Validation("cannot save an anonymous session".to_string()))?;
        let file = TokenFile {
            access_token: access_token.to_string(),
            expires_at: context.expires_at(),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|e| FolioError::Other(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FolioError::Other(e.to_string()))?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut handle = options
            .open(&self.path)
            .await
            .map_err(|e| FolioError::Other(e.to_string()))?;

        // An existing file keeps its old mode on open.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| FolioError::Other(e.to_string()))?;
        }

        tokio::io::AsyncWriteExt::write_all(&mut handle, &json)
            .await
            .map_err(|e| FolioError::Other(e.to_string()))?;
        tokio::io::AsyncWriteExt::flush(&mut handle)
            .await
            .map_err(|e| FolioError::Other(e.to_string()))?;

        debug!("Saved session");
        Ok(())
    }
}

#[async_trait]
impl SessionProvider for TokenFileSession {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn session(&self) -> Result<SessionContext> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            FolioError::auth(
                PROVIDER,
                format!("no saved session at {}: {e}", self.path.display()),
            )
        })?;
        let file: TokenFile = serde_json::from_slice(&bytes).map_err(|e| {
            FolioError::auth(
                PROVIDER,
                format!("unreadable session file {}: {e}", self.path.display()),
            )
        })?;

        let context = SessionContext::bearer(file.access_token, file.expires_at);
        // Validates presence and expiry.
        context.require_token(PROVIDER, Utc::now())?;
        Ok(context)
    }
}
