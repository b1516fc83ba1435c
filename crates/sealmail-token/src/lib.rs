//! # sealmail-token
//!
//! Hardware security token support for the sealmail client.
//!
//! This crate provides:
//! - **Detection** - presence polling with coalesced change notifications
//! - **Identity** - serial, firmware version, and per-slot key fingerprints
//! - **Reconciliation** - ensuring the local keyring holds the public key
//!   matching the token's private key, through an ordered chain of import
//!   methods (direct sync, keyserver, key file, card URL), each verified
//!   after import
//!
//! The PC/SC-backed driver requires the `pcsc` feature, `libpcsclite`, and
//! a running `pcscd`. Everything else works against the [`TokenDriver`]
//! trait and is hardware-free.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod detector;
pub mod driver;
pub mod fetch;
pub mod identity;
pub mod keyring;
pub mod reconcile;

pub use detector::{DetectError, Detection, TokenDetector, TokenEvent};
pub use driver::{DriverError, TokenDriver};
pub use fetch::{DEFAULT_KEYSERVER, FetchError, KeyLookup};
pub use identity::{Fingerprint, IdentityShape, KeyFingerprints, KeySlot, TokenIdentity};
pub use keyring::{KeyringError, KeyringStore};
pub use reconcile::{
    ImportMethod, KeyFileEntry, KeyFileSource, KeyState, MethodResult, ReconcileEngine,
    ReconcileError, ReconcileOutcome, ReconcileReport,
};

#[cfg(feature = "pcsc")]
pub use driver::PcscDriver;
