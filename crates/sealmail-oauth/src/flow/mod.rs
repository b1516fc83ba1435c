//! `OAuth2` authorization flows.
//!
//! Two strategies exist for delivering the authorization code: a loopback
//! redirect served by a short-lived local listener, and an out-of-band
//! variant where the user pastes the code shown by the consent screen.
//! Both converge on the same code-for-token exchange.

mod manual;
mod pkce;
mod redirect;

pub use manual::{CodeEntry, CodePrompt, ManualCodeFlow};
pub use pkce::PkceChallenge;
pub use redirect::RedirectFlow;

use crate::error::Result;
use crate::provider::Provider;
use crate::token::{ErrorResponse, Token, TokenResponse};
use reqwest::Client;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Terminal outcome of an authorization attempt.
///
/// User cancellation is a normal outcome, not an error; it is kept
/// distinct from a denial delivered by the authorization server.
#[derive(Debug)]
pub enum AuthOutcome {
    /// The user consented and the code exchange succeeded.
    Authorized(Token),
    /// The user cancelled the attempt before a code was entered.
    Cancelled,
}

/// Authorization flow strategy, selected by configuration.
#[derive(Debug)]
pub enum AuthFlow<P> {
    /// Loopback redirect flow with a local callback listener.
    Redirect(RedirectFlow),
    /// Out-of-band flow with manual code entry.
    Manual(ManualCodeFlow<P>),
}

impl<P: CodePrompt> AuthFlow<P> {
    /// Runs the selected flow to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the flow fails (port unavailable, timeout,
    /// denial, or a failed code exchange).
    pub async fn authorize(&self) -> Result<AuthOutcome> {
        match self {
            Self::Redirect(flow) => flow.authorize().await,
            Self::Manual(flow) => flow.authorize().await,
        }
    }
}

/// Common `OAuth2` client configuration.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// Client ID from provider.
    pub client_id: String,
    /// Client secret (optional for public clients).
    pub client_secret: Option<String>,
    /// Provider configuration.
    pub provider: Provider,
    /// HTTP client.
    http_client: Client,
}

impl OAuthClient {
    /// Creates a new OAuth client.
    #[must_use]
    pub fn new(client_id: impl Into<String>, provider: Provider) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            provider,
            http_client: Client::new(),
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Refreshes an access token using a refresh token.
    ///
    /// If the server response omits a refresh token, the previous one is
    /// carried over.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh fails or if the token has no refresh token.
    pub async fn refresh_token(&self, token: &Token) -> Result<Token> {
        let refresh_token = token.refresh_token()?;

        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", &self.client_id);

        if let Some(secret) = &self.client_secret {
            params.insert("client_secret", secret);
        }

        let response = self
            .http_client
            .post(self.provider.token_url.clone())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let error: ErrorResponse = response.json().await?;
            return Err(error.into_error());
        }

        let token_response: TokenResponse = response.json().await?;
        let mut new_token = Token::from_response(token_response);

        // Preserve refresh token if not returned
        if new_token.refresh_token.is_none() {
            new_token.refresh_token.clone_from(&token.refresh_token);
        }

        Ok(new_token)
    }

    /// Revokes a token at the provider's revocation endpoint.
    ///
    /// Providers without a revocation endpoint are a no-op. Callers that
    /// must not fail (logout) are expected to log and swallow errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the revocation call fails.
    pub async fn revoke_token(&self, token: &Token) -> Result<()> {
        let Some(revoke_url) = &self.provider.revoke_url else {
            debug!(
                "Provider {} has no revocation endpoint, skipping",
                self.provider.name
            );
            return Ok(());
        };

        let mut params = HashMap::new();
        params.insert("token", token.access_token.as_str());

        let response = self
            .http_client
            .post(revoke_url.clone())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            warn!("Token revocation returned {}", response.status());
            let error: ErrorResponse = response.json().await?;
            return Err(error.into_error());
        }

        debug!("Token revoked at {}", self.provider.name);
        Ok(())
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub(crate) async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<Token> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("client_id", &self.client_id);

        if let Some(uri) = redirect_uri {
            params.insert("redirect_uri", uri);
        }

        if let Some(secret) = &self.client_secret {
            params.insert("client_secret", secret);
        }

        if let Some(verifier) = code_verifier {
            params.insert("code_verifier", verifier);
        }

        let response = self
            .http_client
            .post(self.provider.token_url.clone())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let error: ErrorResponse = response.json().await?;
            return Err(error.into_error());
        }

        let token_response: TokenResponse = response.json().await?;
        Ok(Token::from_response(token_response))
    }
}

/// Builds the consent URL for an authorization-code grant.
pub(crate) fn consent_url(
    client: &OAuthClient,
    redirect_uri: &str,
    state: Option<&str>,
    pkce: Option<&PkceChallenge>,
) -> url::Url {
    let mut url = client.provider.auth_url.clone();

    {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("client_id", &client.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri);

        let scope_str = client.provider.default_scopes.join(" ");
        if !scope_str.is_empty() {
            pairs.append_pair("scope", &scope_str);
        }

        if let Some(state_val) = state {
            pairs.append_pair("state", state_val);
        }

        if let Some(pkce) = pkce {
            pairs
                .append_pair("code_challenge", pkce.challenge())
                .append_pair("code_challenge_method", pkce.method());
        }

        // Provider-specific parameters
        if client.provider.name == "Google" {
            pairs
                .append_pair("access_type", "offline")
                .append_pair("prompt", "consent");
        }
    }

    url
}
