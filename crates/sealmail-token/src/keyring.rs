//! Interface to the external keyring store.
//!
//! The keyring's storage engine is an external collaborator; this crate
//! only needs trust lookups and imports.

use crate::identity::Fingerprint;

/// Error from the keyring store.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Keyring error: {0}")]
pub struct KeyringError(pub String);

/// Local public-key store consulted and updated during reconciliation.
pub trait KeyringStore: Send + Sync {
    /// Returns whether a key with this fingerprint is present and trusted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn has_key(&self, fingerprint: &Fingerprint) -> Result<bool, KeyringError>;

    /// Imports public key material into the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the material cannot be imported.
    fn import_key(&self, bytes: &[u8]) -> Result<(), KeyringError>;
}
