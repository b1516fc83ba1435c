//! Access tokens and the token-endpoint wire types.
//!
//! The server reports expiry as a relative `expires_in`; it is converted
//! to an absolute timestamp at construction so later checks need no
//! reference point.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An issued access token together with what the server said about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// The bearer credential itself.
    pub access_token: String,
    /// Token type; providers covered here always say "Bearer".
    pub token_type: String,
    /// Absolute expiry, if the server reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Long-lived credential for obtaining replacement access tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope the user actually granted (may differ from the request).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Token {
    /// Creates a bare token with no expiry or refresh credential.
    #[must_use]
    pub fn new(access_token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            expires_at: None,
            refresh_token: None,
            scope: None,
        }
    }

    /// Builds a token from a token-endpoint response, pinning the
    /// relative `expires_in` to an absolute timestamp now.
    #[must_use]
    pub fn from_response(response: TokenResponse) -> Self {
        let expires_at = response
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(i64::from(secs)));

        Self {
            access_token: response.access_token,
            token_type: response.token_type,
            expires_at,
            refresh_token: response.refresh_token,
            scope: response.scope,
        }
    }

    /// Whether the token should be treated as expired.
    ///
    /// Uses a 60-second buffer so a token does not die mid-request; a
    /// token with no expiry never counts as expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now() + Duration::seconds(60) >= exp)
    }

    /// Inverse of [`Self::is_expired`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_expired()
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets the expiry.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The refresh token, required.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRefreshToken`] if the server never granted one.
    pub fn refresh_token(&self) -> Result<&str> {
        self.refresh_token.as_deref().ok_or(Error::NoRefreshToken)
    }
}

/// Successful token-endpoint response body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// The issued access token.
    pub access_token: String,
    /// Token type.
    pub token_type: String,
    /// Lifetime in seconds, relative to issuance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u32>,
    /// Refresh token, when the grant allows one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Error body returned by the token or revocation endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable description; servers may omit it.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Maps the server's error code onto this crate's error type.
    ///
    /// `access_denied` becomes [`Error::Denied`] so callers see one
    /// denial variant regardless of which flow delivered it.
    #[must_use]
    pub fn into_error(self) -> Error {
        if self.error == "access_denied" {
            Error::Denied
        } else {
            Error::oauth_error(self.error, self.error_description)
        }
    }
}
