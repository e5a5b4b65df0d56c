//! OAuth2 authorization-code client
//!
//! Provides the two provider interactions the proxy needs:
//! 1. `OAuthClient::authorization_url()` — where to send the browser
//! 2. `OAuthClient::redeem()` — server-to-server code redemption
//!
//! The client holds no per-flow state. Each redemption is a single POST with
//! a bounded timeout and is never retried here; the user restarts the flow.

pub mod client;
pub mod error;

pub use client::{OAuthClient, OAuthConfig, Redemption};
pub use error::{Error, Result};
