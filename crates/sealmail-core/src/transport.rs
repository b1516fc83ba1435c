//! Mail transport seam.
//!
//! The session layer hands transports a verified access token and nothing
//! else; transports never touch the credential store. Concrete providers
//! (Gmail API, IMAP/SMTP bridges) implement [`MailTransport`] in their own
//! crates.

use serde::{Deserialize, Serialize};

/// Errors from a mail transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The provider rejected the access token.
    #[error("Provider rejected the access token")]
    Unauthorized,

    /// Network-level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The provider returned an unexpected response.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// A message to be sent through a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Raw message body, already encrypted and armored by the caller.
    pub body: String,
}

/// Summary of a stored message, as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    /// Provider-assigned message identifier.
    pub id: String,
    /// Sender address.
    pub from: String,
    /// Subject line.
    pub subject: String,
}

/// Provider-side mail operations, parameterized by a bearer access token.
///
/// Implementations receive the token per call rather than holding one, so
/// the session layer's refresh policy stays the single source of truth.
pub trait MailTransport: Send + Sync {
    /// Sends a message.
    fn send(
        &self,
        access_token: &str,
        message: &OutgoingMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Lists message summaries matching a provider-specific query.
    fn list(
        &self,
        access_token: &str,
        query: &str,
    ) -> impl Future<Output = Result<Vec<MessageSummary>, TransportError>> + Send;

    /// Fetches a message's raw content by identifier.
    fn fetch(
        &self,
        access_token: &str,
        id: &str,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}
