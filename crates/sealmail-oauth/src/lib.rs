//! # sealmail-oauth
//!
//! `OAuth2` authorization library for the sealmail client.
//!
//! ## Features
//!
//! - **Authorization flows**: loopback redirect flow (local callback
//!   listener, with PKCE) and an out-of-band manual code-entry flow
//! - **Token management**: refresh, expiration checking, revocation
//! - **Provider configurations**: pre-configured for Google, custom
//!   providers supported
//!
//! ## Quick Start
//!
//! ```ignore
//! use sealmail_oauth::{OAuthClient, Provider, RedirectFlow, AuthOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Provider::google()?;
//!     let client = OAuthClient::new("your_client_id", provider);
//!
//!     // Opens the consent page, awaits one redirect on the loopback
//!     // listener, and exchanges the code for tokens.
//!     let flow = RedirectFlow::new(client);
//!     match flow.authorize().await? {
//!         AuthOutcome::Authorized(token) => {
//!             println!("Access token: {}", token.access_token);
//!         }
//!         AuthOutcome::Cancelled => println!("Cancelled"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Token Refresh
//!
//! ```ignore
//! if token.is_expired() {
//!     let new_token = client.refresh_token(&token).await?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod flow;
pub mod provider;
pub mod token;

pub use error::{Error, Result};
pub use flow::{
    AuthFlow, AuthOutcome, CodeEntry, CodePrompt, ManualCodeFlow, OAuthClient, PkceChallenge,
    RedirectFlow,
};
pub use provider::Provider;
pub use token::Token;
