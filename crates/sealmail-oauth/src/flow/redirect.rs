//! Loopback redirect flow with a short-lived local callback listener.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::pkce::generate_state;
use super::{AuthOutcome, OAuthClient, PkceChallenge, consent_url};
use crate::error::{Error, Result};

/// Default fixed loopback port for the redirect listener.
pub const DEFAULT_REDIRECT_PORT: u16 = 53682;

/// Default watchdog budget for the whole attempt, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Authorization code flow that receives the code via a loopback redirect.
///
/// The listener serves exactly one request: the first inbound GET wins and
/// the listener closes immediately after responding, regardless of outcome.
#[derive(Debug)]
pub struct RedirectFlow {
    client: OAuthClient,
    port: u16,
    timeout_secs: u64,
    use_pkce: bool,
    open_browser: bool,
}

impl RedirectFlow {
    /// Creates a new loopback redirect flow.
    #[must_use]
    pub const fn new(client: OAuthClient) -> Self {
        Self {
            client,
            port: DEFAULT_REDIRECT_PORT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            use_pkce: true,
            open_browser: true,
        }
    }

    /// Sets the loopback port the listener binds.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the watchdog budget in seconds.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Enables or disables PKCE (enabled by default).
    #[must_use]
    pub const fn with_pkce(mut self, use_pkce: bool) -> Self {
        self.use_pkce = use_pkce;
        self
    }

    /// Enables or disables handing the consent URL to the system browser.
    ///
    /// When disabled the URL is only logged; useful for headless tests.
    #[must_use]
    pub const fn with_browser_open(mut self, open: bool) -> Self {
        self.open_browser = open;
        self
    }

    /// Runs the flow: bind, open consent page, await one redirect, exchange.
    ///
    /// # Errors
    ///
    /// * [`Error::PortUnavailable`] if the fixed port is already bound.
    /// * [`Error::Timeout`] if no redirect arrives within the budget.
    /// * [`Error::Denied`] on an error redirect or malformed request.
    /// * Exchange errors from the token endpoint.
    pub async fn authorize(&self) -> Result<AuthOutcome> {
        let listener = match TcpListener::bind(("127.0.0.1", self.port)).await {
            Ok(listener) => listener,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                return Err(Error::PortUnavailable(self.port));
            }
            Err(e) => return Err(e.into()),
        };

        let redirect_uri = format!("http://127.0.0.1:{}", self.port);
        let state = generate_state();
        let pkce = self.use_pkce.then(PkceChallenge::generate);

        let url = consent_url(&self.client, &redirect_uri, Some(&state), pkce.as_ref());
        info!("Awaiting authorization redirect on {redirect_uri}");

        if self.open_browser {
            // Outside our control: failure to open is logged, not fatal.
            if let Err(e) = opener::open(url.as_str()) {
                warn!("Failed to open browser: {e}. Visit manually: {url}");
            }
        } else {
            debug!("Browser open disabled; consent URL: {url}");
        }

        // Watchdog wraps the wait only; it is cancelled the instant a
        // request is received.
        let code = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            receive_redirect(&listener, &state),
        )
        .await
        .map_err(|_| Error::Timeout(self.timeout_secs))??;

        // Stop the listener before the exchange; the port is free again.
        drop(listener);

        let verifier = pkce.as_ref().map(PkceChallenge::verifier);
        let token = self
            .client
            .exchange_code(&code, Some(&redirect_uri), verifier)
            .await?;

        Ok(AuthOutcome::Authorized(token))
    }
}

/// Accepts exactly one request and extracts the authorization code.
///
/// Responds to the browser before returning; never serves a second request.
async fn receive_redirect(listener: &TcpListener, expected_state: &str) -> Result<String> {
    let (mut socket, peer) = listener.accept().await?;
    debug!("Redirect request from {peer}");

    let request_line = {
        let mut reader = BufReader::new(&mut socket);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        line
    };

    // "GET /path?query HTTP/1.1"
    let query = request_line
        .split_whitespace()
        .nth(1)
        .and_then(|target| target.split_once('?'))
        .map_or("", |(_, q)| q);
    let params = parse_query(query);

    if let Some(code) = params.get("code") {
        if params.get("state").map(String::as_str) != Some(expected_state) {
            respond(&mut socket, "400 Bad Request", page("State mismatch")).await?;
            warn!("Redirect carried a mismatched state parameter");
            return Err(Error::Denied);
        }
        respond(
            &mut socket,
            "200 OK",
            page("Authorization complete. You can close this tab."),
        )
        .await?;
        return Ok(code.clone());
    }

    if let Some(error) = params.get("error") {
        respond(&mut socket, "200 OK", page("Authorization was denied.")).await?;
        warn!("Authorization redirect carried error: {error}");
        return Err(Error::Denied);
    }

    respond(&mut socket, "400 Bad Request", page("Malformed request")).await?;
    Err(Error::Denied)
}

/// Writes a minimal static HTML response and closes the connection.
async fn respond(socket: &mut TcpStream, status: &str, body: String) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

fn page(message: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>sealmail</title></head>\
         <body><h2>sealmail</h2><p>{message}</p></body></html>"
    )
}

/// Parses a URL query string, percent-decoding keys and values.
fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((percent_decode(key), percent_decode(value)))
        })
        .collect()
}

/// Decodes `%XX` escapes and `+` as space.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 3 <= bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                if let Ok(byte) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                    out.push(byte);
                }
                i += 3;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
