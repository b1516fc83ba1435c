//! Persistent storage for the provider session record.
//!
//! One JSON record per user profile directory. Absence or corruption is
//! treated as "logged out", never as a fatal error, so the user falls
//! back to re-authorization instead of crashing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// File name of the session record inside the profile directory.
const SESSION_FILE: &str = "session.json";

/// The persisted provider session.
///
/// Owned exclusively by the [`CredentialStore`]; other components receive
/// clones or derived views, never a mutable reference into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Provider access token.
    pub access_token: String,
    /// Refresh token, if the provider granted one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Creates a record with just an access token.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets the expiry.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// A record with no access token is unauthenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Whether the expiry has passed. A record with no expiry never expires.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Utc::now() >= exp)
    }

    /// Expired with no refresh token: re-authorization is the only way out.
    #[must_use]
    pub fn is_expired_unrecoverable(&self) -> bool {
        self.is_expired() && self.refresh_token.is_none()
    }
}

impl From<sealmail_oauth::Token> for SessionRecord {
    fn from(token: sealmail_oauth::Token) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_at,
        }
    }
}

impl From<&SessionRecord> for sealmail_oauth::Token {
    fn from(record: &SessionRecord) -> Self {
        let mut token = Self::new(record.access_token.clone(), "Bearer");
        token.refresh_token.clone_from(&record.refresh_token);
        token.expires_at = record.expires_at;
        token
    }
}

/// Owns the on-disk session record.
///
/// Every access is scoped: the backing file is opened, used, and closed
/// within each call, on every exit path.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Creates a store rooted at the given profile directory.
    #[must_use]
    pub fn new(profile_dir: impl AsRef<Path>) -> Self {
        Self {
            path: profile_dir.as_ref().join(SESSION_FILE),
        }
    }

    /// Creates a store in the default per-user profile directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no user configuration directory exists.
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no user configuration directory",
                ))
            })?
            .join("sealmail");
        Ok(Self::new(dir))
    }

    /// Loads the current record, if any.
    ///
    /// A missing, unreadable, or corrupt file is `Ok(None)`: the user is
    /// simply logged out.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other store
    /// operations.
    pub fn load(&self) -> Result<Option<SessionRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!("Session record unreadable, treating as logged out: {e}");
                return Ok(None);
            }
        };

        match serde_json::from_str(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Session record corrupt, treating as logged out: {e}");
                Ok(None)
            }
        }
    }

    /// Saves the record, creating the profile directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&self.path, json)?;
        debug!("Session record saved to {}", self.path.display());
        Ok(())
    }

    /// Deletes the record. Clearing an absent record is fine.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Session record cleared");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        // Point below a directory that does not exist yet so save() has to
        // create it.
        let store = CredentialStore::new(dir.path().join("profile"));
        (dir, store)
    }

    #[test]
    fn test_missing_file_is_logged_out() {
        let (_dir, store) = store();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_creates_directory_and_round_trips() {
        let (_dir, store) = store();
        let record = SessionRecord::new("access")
            .with_refresh_token("refresh")
            .with_expires_at(Utc::now() + Duration::hours(1));

        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));
    }

    #[test]
    fn test_corrupt_file_is_logged_out() {
        let (_dir, store) = store();
        store.save(&SessionRecord::new("access")).unwrap();

        fs::write(store.path.clone(), "{not json").unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (_dir, store) = store();
        store.save(&SessionRecord::new("access")).unwrap();

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_record_states() {
        let empty = SessionRecord::new("");
        assert!(!empty.is_authenticated());

        let fresh = SessionRecord::new("a").with_expires_at(Utc::now() + Duration::hours(1));
        assert!(fresh.is_authenticated());
        assert!(!fresh.is_expired());

        let no_expiry = SessionRecord::new("a");
        assert!(!no_expiry.is_expired());

        let unrecoverable =
            SessionRecord::new("a").with_expires_at(Utc::now() - Duration::seconds(1));
        assert!(unrecoverable.is_expired());
        assert!(unrecoverable.is_expired_unrecoverable());

        let recoverable = unrecoverable.with_refresh_token("r");
        assert!(recoverable.is_expired());
        assert!(!recoverable.is_expired_unrecoverable());
    }
}
