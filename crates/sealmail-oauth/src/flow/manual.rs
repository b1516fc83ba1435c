//! Out-of-band flow where the user pastes the code shown by the consent
//! screen into the application.

use tracing::{debug, warn};

use super::{AuthOutcome, OAuthClient, PkceChallenge, consent_url};
use crate::error::{Error, Result};

/// Out-of-band redirect URI: the consent screen displays the code instead
/// of delivering it over a redirect.
const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// A user-entered authorization code, or a cancellation.
#[derive(Debug, Clone)]
pub enum CodeEntry {
    /// The user entered a code.
    Code(String),
    /// The user cancelled the prompt.
    Cancelled,
}

/// Source of the manually entered authorization code.
///
/// UI code implements this over its code-entry dialog; tests implement it
/// over canned values.
pub trait CodePrompt: Send + Sync {
    /// Waits for the user to enter a code or cancel the prompt.
    fn read_code(&self) -> impl Future<Output = CodeEntry> + Send;
}

/// Authorization code flow with manual, out-of-band code entry.
#[derive(Debug)]
pub struct ManualCodeFlow<P> {
    client: OAuthClient,
    prompt: P,
    use_pkce: bool,
    open_browser: bool,
}

impl<P: CodePrompt> ManualCodeFlow<P> {
    /// Creates a new out-of-band flow with the given prompt collaborator.
    #[must_use]
    pub const fn new(client: OAuthClient, prompt: P) -> Self {
        Self {
            client,
            prompt,
            use_pkce: true,
            open_browser: true,
        }
    }

    /// Enables or disables PKCE (enabled by default).
    #[must_use]
    pub const fn with_pkce(mut self, use_pkce: bool) -> Self {
        self.use_pkce = use_pkce;
        self
    }

    /// Enables or disables handing the consent URL to the system browser.
    #[must_use]
    pub const fn with_browser_open(mut self, open: bool) -> Self {
        self.open_browser = open;
        self
    }

    /// Runs the flow: open consent page, prompt for the code, exchange.
    ///
    /// Cancellation from the prompt is a normal outcome
    /// ([`AuthOutcome::Cancelled`]); an empty code entry is treated as a
    /// denial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Denied`] for an empty code, or exchange errors from
    /// the token endpoint.
    pub async fn authorize(&self) -> Result<AuthOutcome> {
        let pkce = self.use_pkce.then(PkceChallenge::generate);
        let url = consent_url(&self.client, OOB_REDIRECT_URI, None, pkce.as_ref());

        if self.open_browser {
            if let Err(e) = opener::open(url.as_str()) {
                warn!("Failed to open browser: {e}. Visit manually: {url}");
            }
        } else {
            debug!("Browser open disabled; consent URL: {url}");
        }

        let code = match self.prompt.read_code().await {
            CodeEntry::Code(code) => code,
            CodeEntry::Cancelled => {
                debug!("Code entry cancelled by user");
                return Ok(AuthOutcome::Cancelled);
            }
        };

        let code = code.trim();
        if code.is_empty() {
            return Err(Error::Denied);
        }

        let verifier = pkce.as_ref().map(PkceChallenge::verifier);
        let token = self
            .client
            .exchange_code(code, Some(OOB_REDIRECT_URI), verifier)
            .await?;

        Ok(AuthOutcome::Authorized(token))
    }
}
