//! Authorization URL construction and code redemption
//!
//! Both operations use the provider endpoints from `OAuthConfig`. The
//! `redirect_uri` sent during redemption is byte-identical to the one in the
//! authorization URL; providers reject the exchange otherwise.

use std::time::Duration;

use common::Secret;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};

/// Upper bound on how much of an error body is echoed into logs and errors.
const MAX_ERROR_BODY: usize = 512;

/// Provider endpoints and client credentials. Immutable after startup.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    /// Provider login page the browser is redirected to
    pub login_url: Url,
    /// Provider token endpoint used for code redemption
    pub redemption_url: Url,
    /// Our callback URL, registered with the provider
    pub redirect_url: Url,
    pub scope: String,
}

/// Outcome of a successful code redemption.
#[derive(Debug)]
pub struct Redemption {
    pub access_token: Secret<String>,
    /// Present when the provider includes the account email in the token response
    pub email: Option<String>,
}

/// Token endpoint response. Only the fields the proxy consumes are modeled.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Client for the provider's authorization-code endpoints.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    config: OAuthConfig,
    timeout: Duration,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, config: OAuthConfig, timeout: Duration) -> Self {
        Self {
            http,
            config,
            timeout,
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the provider login URL for a new handshake.
    ///
    /// Appends `redirect_uri`, `scope`, `client_id` and `response_type=code`,
    /// preserving any query the configured login URL already carries.
    pub fn authorization_url(&self) -> Url {
        let mut url = self.config.login_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_url.as_str())
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scope);
        url
    }

    /// Exchange an authorization code for an access token.
    ///
    /// Performs exactly one POST. Fails if the transport fails or times out,
    /// if the provider answers with a non-success status, if the body is not
    /// JSON, or if it carries no `access_token`.
    pub async fn redeem(&self, code: &str) -> Result<Redemption> {
        let response = self
            .http
            .post(self.config.redemption_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose().as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(self.timeout)
                } else {
                    Error::Http(format!("redemption request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            let body = truncate(&body, MAX_ERROR_BODY);
            warn!(%status, body, "token endpoint rejected code redemption");
            return Err(Error::Redemption(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("failed to read token response: {e}")))?;
        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::Redemption(format!("invalid token response: {e}")))?;

        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Redemption("token response missing access_token".into()))?;

        debug!(has_email = token.email.is_some(), "code redeemed");
        Ok(Redemption {
            access_token: Secret::new(access_token),
            email: token.email.filter(|e| !e.is_empty()),
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
