//! Session manager: the single entry point for authentication state.
//!
//! Mail-sending and fetching collaborators never read the credential
//! store directly; every token-consuming operation goes through
//! [`SessionManager::with_valid_token`].

pub mod refresh;
pub mod store;

pub use refresh::{OAuthTokenService, TokenService, ensure_fresh};
pub use store::{CredentialStore, SessionRecord};

use std::sync::atomic::{AtomicBool, Ordering};

use sealmail_oauth::{AuthFlow, AuthOutcome, CodePrompt};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Authentication state derived from the stored record and the refresh
/// policy's decision table. Never cached independently of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// A usable access token is on hand.
    Authenticated,
    /// The token is expired but a refresh token can recover it.
    RefreshRequired,
    /// The token is expired and unrecoverable; the user must re-authorize.
    ReauthRequired,
    /// No session exists.
    NotAuthenticated,
}

impl AuthStatus {
    /// Whether the session can serve token-consuming operations (possibly
    /// after a refresh).
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated | Self::RefreshRequired)
    }
}

/// Owns the session lifecycle: authorize, check, refresh-on-demand, logout.
#[derive(Debug)]
pub struct SessionManager<P, S> {
    store: CredentialStore,
    flow: AuthFlow<P>,
    service: S,
    auth_in_flight: AtomicBool,
}

impl<P: CodePrompt, S: TokenService> SessionManager<P, S> {
    /// Creates a session manager over its collaborators.
    #[must_use]
    pub const fn new(store: CredentialStore, flow: AuthFlow<P>, service: S) -> Self {
        Self {
            store,
            flow,
            service,
            auth_in_flight: AtomicBool::new(false),
        }
    }

    /// Derives the current authentication state from the store.
    #[must_use]
    pub fn check_authentication(&self) -> AuthStatus {
        let Ok(Some(record)) = self.store.load() else {
            return AuthStatus::NotAuthenticated;
        };
        if !record.is_authenticated() {
            return AuthStatus::NotAuthenticated;
        }
        if record.is_expired_unrecoverable() {
            return AuthStatus::ReauthRequired;
        }
        if record.is_expired() {
            return AuthStatus::RefreshRequired;
        }
        AuthStatus::Authenticated
    }

    /// Runs the configured authorization flow and persists the result.
    ///
    /// At most one attempt may be active; a concurrent call is rejected,
    /// not queued. Cancellation is a normal outcome and leaves the store
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] with
    /// [`AlreadyInProgress`](sealmail_oauth::Error::AlreadyInProgress) for
    /// a concurrent call, or the flow's own error.
    pub async fn authenticate(&self) -> Result<AuthOutcome> {
        if self
            .auth_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Auth(sealmail_oauth::Error::AlreadyInProgress));
        }
        let _guard = InFlightGuard(&self.auth_in_flight);

        let outcome = self.flow.authorize().await?;

        if let AuthOutcome::Authorized(token) = &outcome {
            let record: SessionRecord = token.clone().into();
            self.store.save(&record)?;
            info!("Session authorized");
        }

        Ok(outcome)
    }

    /// Logs out: best-effort remote revocation, then local clear.
    ///
    /// Remote revocation failure (e.g. an already-expired token) is logged
    /// and ignored; local logout always proceeds.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local record cannot be removed.
    pub async fn logout(&self) -> Result<()> {
        if let Ok(Some(record)) = self.store.load() {
            if let Err(e) = self.service.revoke(&record).await {
                warn!("Remote revocation failed, clearing local session anyway: {e}");
            }
        }

        self.store.clear()?;
        info!("Logged out");
        Ok(())
    }

    /// Runs a token-consuming operation with a verified access token.
    ///
    /// Loads the record, runs it through the refresh policy, and only then
    /// invokes `op`. This is the only path by which collaborators obtain a
    /// token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReauthRequired`] when no usable session exists, or
    /// the operation's own error.
    pub async fn with_valid_token<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let record = self.store.load()?.ok_or_else(|| {
            debug!("No session record; re-authorization required");
            Error::ReauthRequired
        })?;

        let record = ensure_fresh(&self.store, &self.service, record).await?;
        op(record.access_token).await
    }
}

/// Clears the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
