//! Hardware token driver interface and the PC/SC-backed implementation.

use crate::identity::{KeySlot, TokenIdentity};

/// Errors from the hardware token driver.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    /// The driver stack (reader, daemon) is unavailable.
    #[error("Token driver unavailable: {0}")]
    Unavailable(String),

    /// Communication with the token failed.
    #[error("Token communication error: {0}")]
    Communication(String),

    /// The requested key slot is empty.
    #[error("No key present in slot {0:?}")]
    KeyNotPresent(KeySlot),

    /// The token returned data we cannot interpret.
    #[error("Invalid data from token: {0}")]
    InvalidData(String),
}

/// Low-level access to a hardware security token.
///
/// Implementations may block; async callers run them on the blocking pool.
pub trait TokenDriver: Send + Sync {
    /// Returns whether a token is currently connected.
    ///
    /// # Errors
    ///
    /// Returns an error only for driver faults; a missing token is `Ok(false)`.
    fn detect(&self) -> Result<bool, DriverError>;

    /// Reads the identity of the connected token.
    ///
    /// # Errors
    ///
    /// Returns an error if no token is connected or communication fails.
    fn read_identity(&self) -> Result<TokenIdentity, DriverError>;

    /// Asks the token to hand over its public key material for a slot.
    ///
    /// Succeeds or fails atomically; no partial state.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::KeyNotPresent`] for an empty slot, or a
    /// communication error.
    fn export_public_key(&self, slot: KeySlot) -> Result<Vec<u8>, DriverError>;
}

#[cfg(feature = "pcsc")]
pub use pcsc::PcscDriver;

#[cfg(feature = "pcsc")]
mod pcsc {
    use card_backend_pcsc::PcscBackend;
    use openpgp_card::Card;
    use secrecy::SecretString;
    use tracing::debug;

    use super::{DriverError, TokenDriver};
    use crate::identity::{Fingerprint, KeyFingerprints, KeySlot, TokenIdentity};

    /// Driver backed by PC/SC (`pcscd`) and the OpenPGP card application.
    #[derive(Debug, Default)]
    pub struct PcscDriver;

    impl PcscDriver {
        /// Creates a new PC/SC driver.
        #[must_use]
        pub const fn new() -> Self {
            Self
        }

        /// Verifies the user PIN (PW1) against the connected token.
        ///
        /// # Errors
        ///
        /// Returns [`DriverError::InvalidData`] for a non-UTF-8 PIN, or a
        /// communication error for a wrong or blocked PIN.
        pub fn verify_user_pin(&self, pin: &[u8]) -> Result<(), DriverError> {
            let pin = std::str::from_utf8(pin)
                .map_err(|_| DriverError::InvalidData("PIN must be valid UTF-8".into()))?;

            let mut card = Self::open_card()?;
            let mut tx = card
                .transaction()
                .map_err(|e| DriverError::Communication(e.to_string()))?;

            tx.verify_user_pin(SecretString::new(pin.to_string()))
                .map_err(|e| DriverError::Communication(e.to_string()))
        }

        fn open_card() -> Result<Card<openpgp_card::state::Open>, DriverError> {
            let mut cards = PcscBackend::cards(None)
                .map_err(|e| DriverError::Unavailable(e.to_string()))?;

            let backend = cards
                .next()
                .ok_or_else(|| DriverError::Communication("no token connected".into()))?
                .map_err(|e| DriverError::Communication(e.to_string()))?;

            Card::new(backend).map_err(|e| DriverError::Communication(e.to_string()))
        }
    }

    impl TokenDriver for PcscDriver {
        fn detect(&self) -> Result<bool, DriverError> {
            match PcscBackend::cards(None) {
                Ok(mut cards) => Ok(cards.next().is_some()),
                Err(e) => Err(DriverError::Unavailable(e.to_string())),
            }
        }

        fn read_identity(&self) -> Result<TokenIdentity, DriverError> {
            let mut card = Self::open_card()?;
            let mut tx = card
                .transaction()
                .map_err(|e| DriverError::Communication(e.to_string()))?;

            let aid = tx
                .application_identifier()
                .map_err(|e| DriverError::InvalidData(e.to_string()))?;
            let serial = format!("{:08X}", aid.serial());
            // Version is packed as major.minor in a u16.
            let version = aid.version();
            let firmware_version = format!("{}.{}", version >> 8, version & 0xFF);

            let mut fingerprints = KeyFingerprints::default();
            if let Ok(fps) = tx.fingerprints() {
                fingerprints.signature = fps
                    .signature()
                    .map(|fp| Fingerprint::new(hex::encode(fp.as_bytes())));
                fingerprints.decryption = fps
                    .decryption()
                    .map(|fp| Fingerprint::new(hex::encode(fp.as_bytes())));
                fingerprints.authentication = fps
                    .authentication()
                    .map(|fp| Fingerprint::new(hex::encode(fp.as_bytes())));
            }

            let cardholder = tx.cardholder_name().ok().filter(|name| !name.is_empty());
            let public_key_url = tx.url().ok().filter(|url| !url.is_empty());

            debug!("Read identity from token {serial}");

            Ok(TokenIdentity {
                serial,
                firmware_version,
                cardholder,
                public_key_url,
                // OpenPGP cards gate private-key use behind PW1.
                needs_pin: true,
                fingerprints,
            })
        }

        fn export_public_key(&self, slot: KeySlot) -> Result<Vec<u8>, DriverError> {
            let identity = self.read_identity()?;
            if identity.fingerprints.slot(slot).is_none() {
                return Err(DriverError::KeyNotPresent(slot));
            }

            // The card exposes raw algorithm material, not an OpenPGP
            // certificate; without packet assembly the keyring cannot
            // import it. Reported as invalid data so reconciliation
            // records the attempt and falls through to the other methods.
            Err(DriverError::InvalidData(
                "token exposes raw key material, not an importable certificate".into(),
            ))
        }
    }
}
