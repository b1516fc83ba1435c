//! Key reconciliation engine.
//!
//! Given a fingerprint exposed by a hardware token, ensures the local
//! keyring holds the corresponding public key, attempting an ordered chain
//! of import methods and re-verifying trust after each import.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::driver::TokenDriver;
use crate::fetch::{self, KeyLookup};
use crate::identity::Fingerprint;
use crate::keyring::KeyringStore;

/// Reconciliation state of one fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyState {
    /// Not yet examined.
    #[default]
    Unknown,
    /// Trust lookup in progress.
    Checking,
    /// The public key is present and trusted locally.
    Trusted,
    /// The public key is absent locally.
    Missing,
    /// An import completed; trust is being re-verified.
    Verifying,
}

/// Import methods, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportMethod {
    /// Ask the token itself for its public key material.
    DirectSync,
    /// Look the fingerprint up on a public keyserver.
    Keyserver,
    /// Let the user supply a key file.
    File,
    /// Fetch from the retrieval URL advertised by the token.
    CardUrl,
}

/// Result of one import attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodResult {
    /// The key was imported and re-verified as trusted.
    Imported,
    /// The method does not apply (no URL advertised, token absent).
    NotApplicable,
    /// The user cancelled the method; a normal outcome, not an error.
    Canceled,
    /// The method was attempted and failed, with a reason.
    Failed(String),
}

/// One recorded reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// The method attempted.
    pub method: ImportMethod,
    /// How the attempt ended.
    pub result: MethodResult,
}

/// Report of one reconciliation pass.
#[derive(Debug)]
pub struct ReconcileReport {
    /// The fingerprint that was reconciled.
    pub fingerprint: Fingerprint,
    /// Final state after the pass.
    pub state: KeyState,
    /// Outcomes of the methods attempted during this pass, in order.
    pub outcomes: Vec<ReconcileOutcome>,
}

/// Errors from reconciliation.
///
/// Per-method failures are not errors; they are recorded as
/// [`ReconcileOutcome`]s and the chain continues.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The keyring store itself faulted.
    #[error("Keyring fault: {0}")]
    Keyring(String),

    /// An import reported success but the key is not verifiable as
    /// trusted. The keyring may be partially corrupt; the chain stops.
    #[error("Import via {method:?} for {fingerprint} is not verifiable as trusted")]
    VerificationFailed {
        /// The method whose import did not verify.
        method: ImportMethod,
        /// The fingerprint being reconciled.
        fingerprint: Fingerprint,
    },
}

/// A user-supplied key file, or a cancellation.
#[derive(Debug, Clone)]
pub enum KeyFileEntry {
    /// The user picked a file; its contents.
    File(Vec<u8>),
    /// The user dismissed the dialog.
    Cancelled,
}

/// Source of user-supplied key files.
///
/// UI code implements this over a file dialog; tests over canned bytes.
pub trait KeyFileSource: Send + Sync {
    /// Waits for the user to pick a file or cancel.
    fn pick(&self) -> impl Future<Output = KeyFileEntry> + Send;
}

/// Reconciles local keyring contents against a hardware token's identity.
#[derive(Debug)]
pub struct ReconcileEngine<K, D, F> {
    keyring: K,
    driver: Arc<D>,
    files: F,
    http: reqwest::Client,
    keyserver: Option<String>,
    states: HashMap<Fingerprint, KeyState>,
    attempts: Vec<ReconcileOutcome>,
}

impl<K, D, F> ReconcileEngine<K, D, F>
where
    K: KeyringStore,
    D: TokenDriver + 'static,
    F: KeyFileSource,
{
    /// Creates a new engine over the given collaborators.
    #[must_use]
    pub fn new(keyring: K, driver: D, files: F) -> Self {
        Self {
            keyring,
            driver: Arc::new(driver),
            files,
            http: reqwest::Client::new(),
            keyserver: None,
            states: HashMap::new(),
            attempts: Vec::new(),
        }
    }

    /// Overrides the keyserver used for fingerprint lookups.
    #[must_use]
    pub fn with_keyserver(mut self, keyserver: impl Into<String>) -> Self {
        self.keyserver = Some(keyserver.into());
        self
    }

    /// Current state of a fingerprint.
    #[must_use]
    pub fn state(&self, fingerprint: &Fingerprint) -> KeyState {
        self.states.get(fingerprint).copied().unwrap_or_default()
    }

    /// All attempts recorded in the current session, in order.
    #[must_use]
    pub fn attempts(&self) -> &[ReconcileOutcome] {
        &self.attempts
    }

    /// Number of attempts made in the current session.
    ///
    /// UI uses this to decide whether to surface a re-check affordance.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Clears the session attempt log.
    pub fn clear_attempts(&mut self) {
        self.attempts.clear();
    }

    /// Runs one reconciliation pass for a fingerprint.
    ///
    /// If the key is already trusted, no method is attempted. Otherwise
    /// the methods run in order (direct sync, keyserver, file, card URL),
    /// each at most once per pass, stopping at the first verified import.
    ///
    /// # Errors
    ///
    /// Returns an error for keyring faults, or
    /// [`ReconcileError::VerificationFailed`] when an import succeeds but
    /// the key is not independently verifiable as trusted.
    pub async fn reconcile(
        &mut self,
        fingerprint: &Fingerprint,
    ) -> Result<ReconcileReport, ReconcileError> {
        self.set_state(fingerprint, KeyState::Checking);

        if self.has_key(fingerprint)? {
            debug!("Key {fingerprint} already trusted");
            self.set_state(fingerprint, KeyState::Trusted);
            return Ok(ReconcileReport {
                fingerprint: fingerprint.clone(),
                state: KeyState::Trusted,
                outcomes: Vec::new(),
            });
        }

        self.set_state(fingerprint, KeyState::Missing);
        let mut outcomes = Vec::new();

        // Direct sync is skipped without an outcome when the token does
        // not expose this fingerprint; the other methods always record one.
        if let Some(result) = self.try_direct_sync(fingerprint).await? {
            let done = result == MethodResult::Imported;
            self.record(&mut outcomes, ImportMethod::DirectSync, result);
            if done {
                return Ok(self.finish(fingerprint, KeyState::Trusted, outcomes));
            }
        }

        let result = self.try_keyserver(fingerprint).await?;
        let done = result == MethodResult::Imported;
        self.record(&mut outcomes, ImportMethod::Keyserver, result);
        if done {
            return Ok(self.finish(fingerprint, KeyState::Trusted, outcomes));
        }

        let result = self.try_file(fingerprint).await?;
        let done = result == MethodResult::Imported;
        self.record(&mut outcomes, ImportMethod::File, result);
        if done {
            return Ok(self.finish(fingerprint, KeyState::Trusted, outcomes));
        }

        let result = self.try_card_url(fingerprint).await?;
        let done = result == MethodResult::Imported;
        self.record(&mut outcomes, ImportMethod::CardUrl, result);
        if done {
            return Ok(self.finish(fingerprint, KeyState::Trusted, outcomes));
        }

        info!("Reconciliation for {fingerprint} exhausted all methods");
        Ok(self.finish(fingerprint, KeyState::Missing, outcomes))
    }

    fn finish(
        &mut self,
        fingerprint: &Fingerprint,
        state: KeyState,
        outcomes: Vec<ReconcileOutcome>,
    ) -> ReconcileReport {
        self.set_state(fingerprint, state);
        ReconcileReport {
            fingerprint: fingerprint.clone(),
            state,
            outcomes,
        }
    }

    fn record(
        &mut self,
        outcomes: &mut Vec<ReconcileOutcome>,
        method: ImportMethod,
        result: MethodResult,
    ) {
        debug!("Reconcile attempt {method:?}: {result:?}");
        let outcome = ReconcileOutcome { method, result };
        outcomes.push(outcome.clone());
        self.attempts.push(outcome);
    }

    fn set_state(&mut self, fingerprint: &Fingerprint, state: KeyState) {
        self.states.insert(fingerprint.clone(), state);
    }

    fn has_key(&self, fingerprint: &Fingerprint) -> Result<bool, ReconcileError> {
        self.keyring
            .has_key(fingerprint)
            .map_err(|e| ReconcileError::Keyring(e.to_string()))
    }

    /// Imports key material, then independently re-verifies trust.
    ///
    /// An import that "succeeds" but does not verify is reported as
    /// [`ReconcileError::VerificationFailed`], never as imported.
    async fn import_and_verify(
        &mut self,
        fingerprint: &Fingerprint,
        method: ImportMethod,
        bytes: &[u8],
    ) -> Result<MethodResult, ReconcileError> {
        if let Err(e) = self.keyring.import_key(bytes) {
            return Ok(MethodResult::Failed(format!("import failed: {e}")));
        }

        self.set_state(fingerprint, KeyState::Verifying);
        if self.has_key(fingerprint)? {
            Ok(MethodResult::Imported)
        } else {
            warn!("Import via {method:?} did not verify for {fingerprint}");
            self.set_state(fingerprint, KeyState::Missing);
            Err(ReconcileError::VerificationFailed {
                method,
                fingerprint: fingerprint.clone(),
            })
        }
    }

    /// Reads the token identity on the blocking pool.
    async fn read_identity(&self) -> Option<crate::identity::TokenIdentity> {
        let driver = Arc::clone(&self.driver);
        let result = tokio::task::spawn_blocking(move || {
            if driver.detect().ok()? { driver.read_identity().ok() } else { None }
        })
        .await;
        result.ok().flatten()
    }

    /// Direct sync: `None` means the method is skipped (token absent or
    /// fingerprint not on this token), not attempted.
    async fn try_direct_sync(
        &mut self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<MethodResult>, ReconcileError> {
        let Some(identity) = self.read_identity().await else {
            return Ok(None);
        };
        let Some(slot) = identity.fingerprints.slot_of(fingerprint) else {
            return Ok(None);
        };

        let driver = Arc::clone(&self.driver);
        let exported =
            tokio::task::spawn_blocking(move || driver.export_public_key(slot)).await;

        let bytes = match exported {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Ok(Some(MethodResult::Failed(e.to_string()))),
            Err(e) => return Ok(Some(MethodResult::Failed(e.to_string()))),
        };

        self.import_and_verify(fingerprint, ImportMethod::DirectSync, &bytes)
            .await
            .map(Some)
    }

    async fn try_keyserver(
        &mut self,
        fingerprint: &Fingerprint,
    ) -> Result<MethodResult, ReconcileError> {
        let lookup =
            fetch::fetch_by_fingerprint(&self.http, self.keyserver.as_deref(), fingerprint).await;

        match lookup {
            Ok(KeyLookup::Found(bytes)) => {
                self.import_and_verify(fingerprint, ImportMethod::Keyserver, &bytes)
                    .await
            }
            Ok(KeyLookup::NotFound) => Ok(MethodResult::Failed(
                "key not found on keyserver".to_string(),
            )),
            Err(e) => Ok(MethodResult::Failed(e.to_string())),
        }
    }

    async fn try_file(
        &mut self,
        fingerprint: &Fingerprint,
    ) -> Result<MethodResult, ReconcileError> {
        match self.files.pick().await {
            KeyFileEntry::File(bytes) => {
                self.import_and_verify(fingerprint, ImportMethod::File, &bytes)
                    .await
            }
            KeyFileEntry::Cancelled => Ok(MethodResult::Canceled),
        }
    }

    async fn try_card_url(
        &mut self,
        fingerprint: &Fingerprint,
    ) -> Result<MethodResult, ReconcileError> {
        let url = self.read_identity().await.and_then(|id| id.public_key_url);
        // No advertised URL is a normal outcome, distinguished from a
        // transient lookup failure.
        let Some(url) = url else {
            return Ok(MethodResult::NotApplicable);
        };

        match fetch::fetch_card_url(&self.http, &url).await {
            Ok(bytes) => {
                self.import_and_verify(fingerprint, ImportMethod::CardUrl, &bytes)
                    .await
            }
            Err(e) => Ok(MethodResult::Failed(e.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::driver::DriverError;
    use crate::identity::{KeyFingerprints, KeySlot, TokenIdentity};
    use crate::keyring::KeyringError;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Keyring mock; `accept_imports` controls whether imports verify.
    struct MockKeyring {
        keys: Mutex<HashSet<Fingerprint>>,
        accept_imports: bool,
        expected: Fingerprint,
    }

    impl MockKeyring {
        fn new(expected: &Fingerprint, accept_imports: bool) -> Self {
            Self {
                keys: Mutex::new(HashSet::new()),
                accept_imports,
                expected: expected.clone(),
            }
        }

        fn with_key(expected: &Fingerprint) -> Self {
            let keyring = Self::new(expected, true);
            keyring.keys.lock().unwrap().insert(expected.clone());
            keyring
        }
    }

    impl KeyringStore for MockKeyring {
        fn has_key(&self, fingerprint: &Fingerprint) -> Result<bool, KeyringError> {
            Ok(self.keys.lock().unwrap().contains(fingerprint))
        }

        fn import_key(&self, _bytes: &[u8]) -> Result<(), KeyringError> {
            if self.accept_imports {
                self.keys.lock().unwrap().insert(self.expected.clone());
            }
            Ok(())
        }
    }

    /// Driver mock exposing a configurable identity.
    struct MockDriver {
        identity: Option<TokenIdentity>,
        export: Result<Vec<u8>, DriverError>,
    }

    impl MockDriver {
        fn absent() -> Self {
            Self {
                identity: None,
                export: Err(DriverError::KeyNotPresent(KeySlot::Signature)),
            }
        }

        fn with_identity(identity: TokenIdentity, export: Result<Vec<u8>, DriverError>) -> Self {
            Self {
                identity: Some(identity),
                export,
            }
        }
    }

    impl TokenDriver for MockDriver {
        fn detect(&self) -> Result<bool, DriverError> {
            Ok(self.identity.is_some())
        }

        fn read_identity(&self) -> Result<TokenIdentity, DriverError> {
            self.identity
                .clone()
                .ok_or_else(|| DriverError::Communication("absent".into()))
        }

        fn export_public_key(&self, _slot: KeySlot) -> Result<Vec<u8>, DriverError> {
            self.export.clone()
        }
    }

    struct MockFiles(KeyFileEntry);

    impl KeyFileSource for MockFiles {
        async fn pick(&self) -> KeyFileEntry {
            self.0.clone()
        }
    }

    fn fpr() -> Fingerprint {
        Fingerprint::new("A4F388BBB194925AE301F844C52B42177857DD79")
    }

    fn identity_with(fpr: &Fingerprint, url: Option<&str>) -> TokenIdentity {
        TokenIdentity {
            serial: "12345678".to_string(),
            firmware_version: "5.4".to_string(),
            cardholder: None,
            public_key_url: url.map(String::from),
            needs_pin: true,
            fingerprints: KeyFingerprints {
                signature: Some(fpr.clone()),
                decryption: None,
                authentication: None,
            },
        }
    }

    /// Keyserver stub answering every request with the given response.
    fn keyserver_stub(response: &'static str) -> String {
        use std::io::{Read, Write};
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            while let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0_u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    const NOT_FOUND: &str =
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const FOUND: &str = "HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\nKEY";

    #[tokio::test]
    async fn test_already_trusted_attempts_nothing() {
        let fpr = fpr();
        let mut engine = ReconcileEngine::new(
            MockKeyring::with_key(&fpr),
            MockDriver::absent(),
            MockFiles(KeyFileEntry::Cancelled),
        );

        let report = engine.reconcile(&fpr).await.unwrap();
        assert_eq!(report.state, KeyState::Trusted);
        assert!(report.outcomes.is_empty());
        assert_eq!(engine.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_direct_sync_short_circuits() {
        let fpr = fpr();
        let driver = MockDriver::with_identity(identity_with(&fpr, None), Ok(b"MATERIAL".to_vec()));
        let mut engine = ReconcileEngine::new(
            MockKeyring::new(&fpr, true),
            driver,
            MockFiles(KeyFileEntry::Cancelled),
        );

        let report = engine.reconcile(&fpr).await.unwrap();
        assert_eq!(report.state, KeyState::Trusted);
        assert_eq!(
            report.outcomes,
            vec![ReconcileOutcome {
                method: ImportMethod::DirectSync,
                result: MethodResult::Imported,
            }]
        );
        assert_eq!(engine.state(&fpr), KeyState::Trusted);
    }

    #[tokio::test]
    async fn test_direct_sync_export_failure_falls_through() {
        // The token exposes the fingerprint but cannot hand over
        // importable material; the chain records the failure and moves on.
        let fpr = fpr();
        let driver = MockDriver::with_identity(
            identity_with(&fpr, None),
            Err(DriverError::InvalidData("no importable certificate".into())),
        );
        let server = keyserver_stub(FOUND);
        let mut engine = ReconcileEngine::new(
            MockKeyring::new(&fpr, true),
            driver,
            MockFiles(KeyFileEntry::Cancelled),
        )
        .with_keyserver(server);

        let report = engine.reconcile(&fpr).await.unwrap();
        assert_eq!(report.state, KeyState::Trusted);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].method, ImportMethod::DirectSync);
        assert!(matches!(report.outcomes[0].result, MethodResult::Failed(_)));
        assert_eq!(report.outcomes[1].method, ImportMethod::Keyserver);
        assert_eq!(report.outcomes[1].result, MethodResult::Imported);
    }

    #[tokio::test]
    async fn test_exhausted_chain_records_all_outcomes() {
        // Token absent, keyserver miss, user cancels the file dialog, no
        // card URL: three outcomes, final state missing.
        let fpr = fpr();
        let server = keyserver_stub(NOT_FOUND);
        let mut engine = ReconcileEngine::new(
            MockKeyring::new(&fpr, true),
            MockDriver::absent(),
            MockFiles(KeyFileEntry::Cancelled),
        )
        .with_keyserver(server);

        let report = engine.reconcile(&fpr).await.unwrap();
        assert_eq!(report.state, KeyState::Missing);
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.outcomes[0].method, ImportMethod::Keyserver);
        assert!(matches!(report.outcomes[0].result, MethodResult::Failed(_)));
        assert_eq!(report.outcomes[1].method, ImportMethod::File);
        assert_eq!(report.outcomes[1].result, MethodResult::Canceled);
        assert_eq!(report.outcomes[2].method, ImportMethod::CardUrl);
        assert_eq!(report.outcomes[2].result, MethodResult::NotApplicable);
        assert_eq!(engine.state(&fpr), KeyState::Missing);
        assert_eq!(engine.attempt_count(), 3);
    }

    #[tokio::test]
    async fn test_keyserver_import_is_verified() {
        let fpr = fpr();
        let server = keyserver_stub(FOUND);
        let mut engine = ReconcileEngine::new(
            MockKeyring::new(&fpr, true),
            MockDriver::absent(),
            MockFiles(KeyFileEntry::Cancelled),
        )
        .with_keyserver(server);

        let report = engine.reconcile(&fpr).await.unwrap();
        assert_eq!(report.state, KeyState::Trusted);
        assert_eq!(
            report.outcomes,
            vec![ReconcileOutcome {
                method: ImportMethod::Keyserver,
                result: MethodResult::Imported,
            }]
        );
    }

    #[tokio::test]
    async fn test_unverifiable_import_is_verification_failed() {
        // Import "succeeds" but has_key stays false afterwards.
        let fpr = fpr();
        let server = keyserver_stub(FOUND);
        let mut engine = ReconcileEngine::new(
            MockKeyring::new(&fpr, false),
            MockDriver::absent(),
            MockFiles(KeyFileEntry::Cancelled),
        )
        .with_keyserver(server);

        let result = engine.reconcile(&fpr).await;
        assert!(matches!(
            result,
            Err(ReconcileError::VerificationFailed {
                method: ImportMethod::Keyserver,
                ..
            })
        ));
        assert_eq!(engine.state(&fpr), KeyState::Missing);
    }

    #[tokio::test]
    async fn test_file_import_succeeds() {
        let fpr = fpr();
        let server = keyserver_stub(NOT_FOUND);
        let mut engine = ReconcileEngine::new(
            MockKeyring::new(&fpr, true),
            MockDriver::absent(),
            MockFiles(KeyFileEntry::File(b"KEYFILE".to_vec())),
        )
        .with_keyserver(server);

        let report = engine.reconcile(&fpr).await.unwrap();
        assert_eq!(report.state, KeyState::Trusted);
        let last = report.outcomes.last().unwrap();
        assert_eq!(last.method, ImportMethod::File);
        assert_eq!(last.result, MethodResult::Imported);
    }

    #[tokio::test]
    async fn test_prior_attempts_stay_visible_across_passes() {
        let fpr = fpr();
        let server = keyserver_stub(NOT_FOUND);
        let mut engine = ReconcileEngine::new(
            MockKeyring::new(&fpr, true),
            MockDriver::absent(),
            MockFiles(KeyFileEntry::Cancelled),
        )
        .with_keyserver(server);

        engine.reconcile(&fpr).await.unwrap();
        engine.reconcile(&fpr).await.unwrap();
        // Two user-initiated passes, three attempts each.
        assert_eq!(engine.attempt_count(), 6);

        engine.clear_attempts();
        assert_eq!(engine.attempt_count(), 0);
    }
}
