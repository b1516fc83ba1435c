//! Token refresh policy.
//!
//! Decides whether a session record is usable as-is, must be refreshed,
//! or requires re-authorization. Refresh failures are never retried here;
//! they demote the session to unauthenticated so stale tokens cannot leak
//! into later calls.

use tracing::{debug, warn};

use super::store::{CredentialStore, SessionRecord};
use crate::error::{Error, Result};

/// Provider-side token operations the session layer depends on.
///
/// Production uses [`OAuthTokenService`]; tests substitute mocks.
pub trait TokenService: Send + Sync {
    /// Exchanges a refresh token for a new session record.
    fn refresh(
        &self,
        record: &SessionRecord,
    ) -> impl Future<Output = std::result::Result<SessionRecord, sealmail_oauth::Error>> + Send;

    /// Revokes the session's token at the provider.
    fn revoke(
        &self,
        record: &SessionRecord,
    ) -> impl Future<Output = std::result::Result<(), sealmail_oauth::Error>> + Send;
}

/// [`TokenService`] backed by the provider's OAuth endpoints.
#[derive(Debug)]
pub struct OAuthTokenService {
    client: sealmail_oauth::OAuthClient,
}

impl OAuthTokenService {
    /// Creates a service over the given OAuth client.
    #[must_use]
    pub const fn new(client: sealmail_oauth::OAuthClient) -> Self {
        Self { client }
    }
}

impl TokenService for OAuthTokenService {
    async fn refresh(
        &self,
        record: &SessionRecord,
    ) -> std::result::Result<SessionRecord, sealmail_oauth::Error> {
        let token = self.client.refresh_token(&record.into()).await?;
        Ok(token.into())
    }

    async fn revoke(
        &self,
        record: &SessionRecord,
    ) -> std::result::Result<(), sealmail_oauth::Error> {
        self.client.revoke_token(&record.into()).await
    }
}

/// Ensures a record is fresh, refreshing and persisting it if necessary.
///
/// Decision table:
/// - no expiry, or expiry in the future: the record is returned unchanged
///   and no network call is made;
/// - expired with a refresh token: one refresh call, the new record is
///   persisted and returned;
/// - expired without a refresh token: re-authorization is required.
///
/// # Errors
///
/// Returns [`Error::ReauthRequired`] when the record cannot be made
/// fresh; the stored record is cleared on refresh failure.
pub async fn ensure_fresh<S: TokenService>(
    store: &CredentialStore,
    service: &S,
    record: SessionRecord,
) -> Result<SessionRecord> {
    if !record.is_expired() {
        return Ok(record);
    }

    if record.refresh_token.is_none() {
        debug!("Session expired with no refresh token");
        return Err(Error::ReauthRequired);
    }

    match service.refresh(&record).await {
        Ok(refreshed) => {
            store.save(&refreshed)?;
            debug!("Session refreshed");
            Ok(refreshed)
        }
        Err(e) => {
            // Not retried: demote to unauthenticated so later calls
            // cannot pick up the stale token.
            warn!("Token refresh failed, re-authorization required: {e}");
            store.clear()?;
            Err(Error::ReauthRequired)
        }
    }
}
