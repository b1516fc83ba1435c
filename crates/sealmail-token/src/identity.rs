//! Identity exposed by a connected hardware security token.

/// Key slot identifiers on an OpenPGP hardware token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySlot {
    /// Signature key slot.
    Signature,
    /// Decryption key slot.
    Decryption,
    /// Authentication key slot.
    Authentication,
}

impl KeySlot {
    /// All slots, in card order.
    pub const ALL: [Self; 3] = [Self::Signature, Self::Decryption, Self::Authentication];
}

/// Stable identifier of a public key, normalized to uppercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Creates a fingerprint, stripping spaces and uppercasing.
    #[must_use]
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(
            raw.as_ref()
                .chars()
                .filter(|c| !c.is_whitespace())
                .map(|c| c.to_ascii_uppercase())
                .collect(),
        )
    }

    /// Returns the normalized hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-slot key fingerprints exposed by a token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFingerprints {
    /// Fingerprint of the signature key (if present).
    pub signature: Option<Fingerprint>,
    /// Fingerprint of the decryption key (if present).
    pub decryption: Option<Fingerprint>,
    /// Fingerprint of the authentication key (if present).
    pub authentication: Option<Fingerprint>,
}

impl KeyFingerprints {
    /// Returns the fingerprint in the given slot.
    #[must_use]
    pub const fn slot(&self, slot: KeySlot) -> Option<&Fingerprint> {
        match slot {
            KeySlot::Signature => self.signature.as_ref(),
            KeySlot::Decryption => self.decryption.as_ref(),
            KeySlot::Authentication => self.authentication.as_ref(),
        }
    }

    /// Returns the slot holding the given fingerprint, if any.
    #[must_use]
    pub fn slot_of(&self, fingerprint: &Fingerprint) -> Option<KeySlot> {
        KeySlot::ALL
            .into_iter()
            .find(|&slot| self.slot(slot) == Some(fingerprint))
    }

    /// Per-slot presence flags, in card order.
    #[must_use]
    pub const fn presence(&self) -> [bool; 3] {
        [
            self.signature.is_some(),
            self.decryption.is_some(),
            self.authentication.is_some(),
        ]
    }
}

/// Identity read from a connected hardware token.
///
/// Produced transiently by each detection poll; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    /// Token serial number.
    pub serial: String,
    /// Firmware version, e.g. "5.4".
    pub firmware_version: String,
    /// Cardholder name, if set on the token.
    pub cardholder: Option<String>,
    /// Public key retrieval URL advertised by the token, if any.
    pub public_key_url: Option<String>,
    /// Whether the token requires a PIN before private-key operations.
    ///
    /// Reported explicitly by the driver rather than inferred from error
    /// text.
    pub needs_pin: bool,
    /// Per-slot key fingerprints.
    pub fingerprints: KeyFingerprints,
}

impl TokenIdentity {
    /// Comparison key for change notifications: serial plus per-slot
    /// fingerprint presence. Two identities with equal shape are treated
    /// as the same token state.
    #[must_use]
    pub fn shape(&self) -> IdentityShape {
        IdentityShape {
            serial: self.serial.clone(),
            slots: self.fingerprints.presence(),
        }
    }
}

/// Value-comparable summary of a detection sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityShape {
    serial: String,
    slots: [bool; 3],
}
