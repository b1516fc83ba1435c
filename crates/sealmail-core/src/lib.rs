//! # sealmail-core
//!
//! Session and credential lifecycle for the sealmail client.
//!
//! This crate provides:
//! - **Credential store** - one JSON session record per user profile,
//!   where absence or corruption means "logged out", never a crash
//! - **Refresh policy** - lazy, single-attempt token refresh with demotion
//!   to unauthenticated on failure
//! - **Session manager** - the single entry point collaborators use to
//!   authorize, check state, obtain verified tokens, and log out
//! - **Transport seam** - the [`MailTransport`] trait provider crates
//!   implement, always handed a verified token per call

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod error;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
pub use session::{
    AuthStatus, CredentialStore, OAuthTokenService, SessionManager, SessionRecord, TokenService,
    ensure_fresh,
};
pub use transport::{MailTransport, MessageSummary, OutgoingMessage, TransportError};
