//! Integration tests for the session manager.
//!
//! These tests drive the manager through mock token services and prompt
//! collaborators without touching the network.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Notify;

use sealmail_core::{
    AuthStatus, CredentialStore, Error, SessionManager, SessionRecord, TokenService,
};
use sealmail_oauth::{AuthFlow, AuthOutcome, CodeEntry, CodePrompt, ManualCodeFlow, OAuthClient, Provider};

/// Prompt that blocks until released, so a flow can be held in flight.
struct BlockingPrompt {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl CodePrompt for BlockingPrompt {
    async fn read_code(&self) -> CodeEntry {
        self.entered.notify_one();
        self.release.notified().await;
        CodeEntry::Cancelled
    }
}

/// Prompt that cancels immediately.
struct CancellingPrompt;

impl CodePrompt for CancellingPrompt {
    async fn read_code(&self) -> CodeEntry {
        CodeEntry::Cancelled
    }
}

/// Token service with canned refresh and revoke outcomes.
struct MockService {
    refreshed: Option<SessionRecord>,
    revoke_fails: bool,
}

impl MockService {
    fn inert() -> Self {
        Self {
            refreshed: None,
            revoke_fails: false,
        }
    }

    fn refreshing(record: SessionRecord) -> Self {
        Self {
            refreshed: Some(record),
            revoke_fails: false,
        }
    }

    fn revoke_failing() -> Self {
        Self {
            refreshed: None,
            revoke_fails: true,
        }
    }
}

impl TokenService for MockService {
    async fn refresh(
        &self,
        _record: &SessionRecord,
    ) -> Result<SessionRecord, sealmail_oauth::Error> {
        self.refreshed
            .clone()
            .ok_or_else(|| sealmail_oauth::Error::oauth_error("invalid_grant", "expired"))
    }

    async fn revoke(&self, _record: &SessionRecord) -> Result<(), sealmail_oauth::Error> {
        if self.revoke_fails {
            Err(sealmail_oauth::Error::oauth_error(
                "invalid_token",
                "already revoked",
            ))
        } else {
            Ok(())
        }
    }
}

fn manual_flow<P: CodePrompt>(prompt: P) -> AuthFlow<P> {
    let provider = Provider::google().expect("built-in provider");
    let client = OAuthClient::new("test_client", provider);
    AuthFlow::Manual(ManualCodeFlow::new(client, prompt).with_browser_open(false))
}

fn store() -> (tempfile::TempDir, CredentialStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CredentialStore::new(dir.path());
    (dir, store)
}

#[tokio::test]
async fn test_concurrent_authenticate_is_rejected() {
    let (_dir, cred_store) = store();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let prompt = BlockingPrompt {
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    };
    let manager = Arc::new(SessionManager::new(
        cred_store,
        manual_flow(prompt),
        MockService::inert(),
    ));

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.authenticate().await })
    };

    // Wait until the first attempt is blocked inside the prompt.
    entered.notified().await;

    let second = manager.authenticate().await;
    assert!(matches!(
        second,
        Err(Error::Auth(sealmail_oauth::Error::AlreadyInProgress))
    ));

    // Release the first attempt; it completes as a cancellation.
    release.notify_one();
    let first = first.await.expect("join").expect("first attempt");
    assert!(matches!(first, AuthOutcome::Cancelled));

    // The guard has cleared; a new attempt is accepted again. Store its
    // release permit up front so the prompt returns immediately.
    release.notify_one();
    let third = manager.authenticate().await.expect("third attempt");
    assert!(matches!(third, AuthOutcome::Cancelled));
}

#[tokio::test]
async fn test_cancelled_authenticate_leaves_store_untouched() {
    let (_dir, cred_store) = store();
    let existing = SessionRecord::new("keep-me");
    cred_store.save(&existing).expect("save");

    let manager = SessionManager::new(
        cred_store.clone(),
        manual_flow(CancellingPrompt),
        MockService::inert(),
    );

    let outcome = manager.authenticate().await.expect("authenticate");
    assert!(matches!(outcome, AuthOutcome::Cancelled));
    assert_eq!(cred_store.load().expect("load"), Some(existing));
}

#[tokio::test]
async fn test_logout_clears_session_even_when_revocation_fails() {
    let (_dir, cred_store) = store();
    cred_store
        .save(&SessionRecord::new("a").with_refresh_token("r"))
        .expect("save");

    let manager = SessionManager::new(
        cred_store,
        manual_flow(CancellingPrompt),
        MockService::revoke_failing(),
    );
    assert!(manager.check_authentication().is_authenticated());

    manager.logout().await.expect("logout");
    assert_eq!(manager.check_authentication(), AuthStatus::NotAuthenticated);
    assert!(!manager.check_authentication().is_authenticated());
}

#[tokio::test]
async fn test_with_valid_token_uses_fresh_token_without_refresh() {
    let (_dir, cred_store) = store();
    let record = SessionRecord::new("fresh").with_expires_at(Utc::now() + Duration::hours(1));
    cred_store.save(&record).expect("save");

    let manager = SessionManager::new(
        cred_store,
        manual_flow(CancellingPrompt),
        // A refresh call would fail loudly if one were attempted.
        MockService::inert(),
    );

    let token = manager
        .with_valid_token(|token| async move { Ok(token) })
        .await
        .expect("operation");
    assert_eq!(token, "fresh");
}

#[tokio::test]
async fn test_with_valid_token_refreshes_expired_session() {
    let (_dir, cred_store) = store();
    let expired = SessionRecord::new("stale")
        .with_refresh_token("r")
        .with_expires_at(Utc::now() - Duration::seconds(1));
    cred_store.save(&expired).expect("save");

    let refreshed = SessionRecord::new("renewed")
        .with_refresh_token("r2")
        .with_expires_at(Utc::now() + Duration::hours(1));
    let manager = SessionManager::new(
        cred_store.clone(),
        manual_flow(CancellingPrompt),
        MockService::refreshing(refreshed.clone()),
    );

    let token = manager
        .with_valid_token(|token| async move { Ok(token) })
        .await
        .expect("operation");
    assert_eq!(token, "renewed");
    // The refreshed record has been persisted.
    assert_eq!(cred_store.load().expect("load"), Some(refreshed));
}

#[tokio::test]
async fn test_with_valid_token_without_session_requires_reauth() {
    let (_dir, cred_store) = store();
    let manager = SessionManager::new(
        cred_store,
        manual_flow(CancellingPrompt),
        MockService::inert(),
    );

    let result = manager
        .with_valid_token(|token| async move { Ok(token) })
        .await;
    assert!(matches!(result, Err(Error::ReauthRequired)));
}

#[tokio::test]
async fn test_check_authentication_state_table() {
    let (_dir, cred_store) = store();
    let manager = SessionManager::new(
        cred_store.clone(),
        manual_flow(CancellingPrompt),
        MockService::inert(),
    );

    assert_eq!(manager.check_authentication(), AuthStatus::NotAuthenticated);

    cred_store
        .save(&SessionRecord::new("a").with_expires_at(Utc::now() + Duration::hours(1)))
        .expect("save");
    assert_eq!(manager.check_authentication(), AuthStatus::Authenticated);

    cred_store
        .save(
            &SessionRecord::new("a")
                .with_refresh_token("r")
                .with_expires_at(Utc::now() - Duration::seconds(1)),
        )
        .expect("save");
    assert_eq!(manager.check_authentication(), AuthStatus::RefreshRequired);

    cred_store
        .save(&SessionRecord::new("a").with_expires_at(Utc::now() - Duration::seconds(1)))
        .expect("save");
    assert_eq!(manager.check_authentication(), AuthStatus::ReauthRequired);
}
