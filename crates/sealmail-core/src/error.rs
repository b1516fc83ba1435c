//! Error types for session management.

/// Errors from the session and credential layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable session; the user must run the authorization flow again.
    #[error("Re-authorization required")]
    ReauthRequired,

    /// Authorization or token endpoint error.
    #[error("Authorization error: {0}")]
    Auth(#[from] sealmail_oauth::Error),

    /// Credential store I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Session record could not be serialized.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Mail transport error surfaced through a session-scoped operation.
    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
