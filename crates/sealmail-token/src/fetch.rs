//! Network key fetching: keyserver lookup and card-URL retrieval.

use tracing::{debug, warn};

use crate::identity::Fingerprint;

/// Default keyserver for fingerprint lookups.
pub const DEFAULT_KEYSERVER: &str = "https://keys.openpgp.org";

/// Extra attempts for transient card-URL fetch failures (no backoff).
const CARD_URL_RETRIES: u32 = 2;

/// Errors from network key fetching.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("Server returned status {0}")]
    Status(u16),
}

/// Result of a keyserver lookup. A miss is a legitimate outcome.
#[derive(Debug)]
pub enum KeyLookup {
    /// Key material found.
    Found(Vec<u8>),
    /// The keyserver does not know this fingerprint.
    NotFound,
}

/// Looks up a fingerprint on a VKS keyserver.
///
/// # Errors
///
/// Returns an error for transport failures or unexpected statuses; a 404
/// is reported as [`KeyLookup::NotFound`], not an error.
pub async fn fetch_by_fingerprint(
    client: &reqwest::Client,
    keyserver: Option<&str>,
    fingerprint: &Fingerprint,
) -> Result<KeyLookup, FetchError> {
    let server = keyserver.unwrap_or(DEFAULT_KEYSERVER);
    let url = format!("{server}/vks/v1/by-fingerprint/{fingerprint}");

    debug!("Keyserver lookup: {url}");
    let response = client.get(&url).send().await?;

    match response.status() {
        status if status.is_success() => {
            let bytes = response.bytes().await?;
            Ok(KeyLookup::Found(bytes.to_vec()))
        }
        reqwest::StatusCode::NOT_FOUND => Ok(KeyLookup::NotFound),
        status => Err(FetchError::Status(status.as_u16())),
    }
}

/// Fetches key material from the URL advertised by the token itself.
///
/// Transient failures (transport errors, 5xx) are retried up to
/// [`CARD_URL_RETRIES`] extra times with no backoff before being surfaced.
///
/// # Errors
///
/// Returns the last error after retries are exhausted, or immediately for
/// non-transient statuses.
pub async fn fetch_card_url(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let mut last_error = None;

    for attempt in 0..=CARD_URL_RETRIES {
        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let bytes = response.bytes().await?;
                    return Ok(bytes.to_vec());
                }
                if status.is_server_error() {
                    warn!("Card URL fetch attempt {attempt} returned {status}");
                    last_error = Some(FetchError::Status(status.as_u16()));
                    continue;
                }
                return Err(FetchError::Status(status.as_u16()));
            }
            Err(e) => {
                warn!("Card URL fetch attempt {attempt} failed: {e}");
                last_error = Some(FetchError::Http(e));
            }
        }
    }

    Err(last_error.unwrap_or(FetchError::Status(0)))
}
