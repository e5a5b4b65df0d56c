//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret and cookie secret are loaded from CLIENT_SECRET /
//! COOKIE_SECRET or from a `*_file` path, never stored in the TOML directly
//! to avoid leaking secrets.

use common::Secret;
use oauth_client::OAuthConfig;
use serde::Deserialize;
use session_cookie::CookieCodec;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::gate::CALLBACK_PATH;

/// Env var overriding `oauth.client_id`
pub const CLIENT_ID_ENV: &str = "CLIENT_ID";
/// Env var holding the OAuth client secret
pub const CLIENT_SECRET_ENV: &str = "CLIENT_SECRET";
/// Env var holding the cookie signing seed
pub const COOKIE_SECRET_ENV: &str = "COOKIE_SECRET";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    pub oauth: OAuthSection,
    #[serde(default)]
    pub cookie: CookieConfig,
    pub validator: ValidatorConfig,
}

/// Listener and upstream settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Upstream base URLs. With more than one, requests are routed by path prefix.
    pub upstreams: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Text shown above the sign-in button
    #[serde(default)]
    pub sign_in_message: Option<String>,
}

/// OAuth provider settings
#[derive(Debug, Deserialize)]
pub struct OAuthSection {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    pub login_url: Url,
    pub redemption_url: Url,
    /// Public callback URL; its path is always forced to `/oauth2/callback`
    pub redirect_url: Url,
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_redeem_timeout")]
    pub timeout_secs: u64,
}

/// Session cookie settings
#[derive(Debug, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_cookie_name")]
    pub name: String,
    #[serde(skip)]
    pub secret: Option<Secret<String>>,
    /// Path to a file containing the cookie secret (alternative to COOKIE_SECRET)
    #[serde(default)]
    pub secret_file: Option<PathBuf>,
    /// Force cookies to this domain when the request host ends with it
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_cookie_expire")]
    pub expire_secs: u64,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            secret: None,
            secret_file: None,
            domain: None,
            expire_secs: default_cookie_expire(),
        }
    }
}

/// Which identity policy decides access
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidatorConfig {
    AllowList {
        #[serde(default)]
        email_domain: Option<String>,
        #[serde(default)]
        authenticated_emails_file: Option<PathBuf>,
    },
    Command {
        command: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_command_timeout")]
        timeout_secs: u64,
    },
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4180))
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_redeem_timeout() -> u64 {
    10
}

fn default_cookie_name() -> String {
    "_oauthproxy".to_string()
}

fn default_cookie_expire() -> u64 {
    7 * 24 * 60 * 60
}

fn default_command_timeout() -> u64 {
    5
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order for both client and cookie secrets:
    /// 1. env var
    /// 2. `*_file` path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.proxy.upstreams.is_empty() {
            return Err(common::Error::Config(
                "at least one upstream is required".into(),
            ));
        }

        if config.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "proxy.timeout_secs must be greater than 0".into(),
            ));
        }

        if config.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.oauth.timeout_secs == 0 {
            return Err(common::Error::Config(
                "oauth.timeout_secs must be greater than 0".into(),
            ));
        }

        for (field, url) in [
            ("login_url", &config.oauth.login_url),
            ("redemption_url", &config.oauth.redemption_url),
            ("redirect_url", &config.oauth.redirect_url),
        ] {
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(common::Error::Config(format!(
                    "oauth.{field} must start with http:// or https://, got: {url}"
                )));
            }
        }
        config.oauth.redirect_url.set_path(CALLBACK_PATH);

        if let Ok(id) = std::env::var(CLIENT_ID_ENV) {
            config.oauth.client_id = Some(id);
        }
        if config
            .oauth
            .client_id
            .as_deref()
            .is_none_or(|id| id.trim().is_empty())
        {
            return Err(common::Error::Config(format!(
                "missing client id: set oauth.client_id or {CLIENT_ID_ENV}"
            )));
        }

        config.oauth.client_secret = resolve_secret(
            CLIENT_SECRET_ENV,
            config.oauth.client_secret_file.as_deref(),
            "oauth.client_secret_file",
        )?;
        config.cookie.secret = resolve_secret(
            COOKIE_SECRET_ENV,
            config.cookie.secret_file.as_deref(),
            "cookie.secret_file",
        )?;

        if !is_valid_cookie_name(&config.cookie.name) {
            return Err(common::Error::Config(format!(
                "invalid cookie name: {:?}",
                config.cookie.name
            )));
        }

        if config.cookie.expire_secs == 0 {
            return Err(common::Error::Config(
                "cookie.expire_secs must be greater than 0".into(),
            ));
        }

        if let ValidatorConfig::Command { timeout_secs: 0, .. } = config.validator {
            return Err(common::Error::Config(
                "validator.timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth-auth-proxy.toml")
    }

    /// Provider endpoints and credentials for the OAuth client.
    pub fn oauth_config(&self) -> common::Result<OAuthConfig> {
        let client_id = self
            .oauth
            .client_id
            .clone()
            .ok_or_else(|| common::Error::Config("missing client id".into()))?;
        let client_secret = self
            .oauth
            .client_secret
            .clone()
            .ok_or_else(|| common::Error::Config("missing client secret".into()))?;
        Ok(OAuthConfig {
            client_id,
            client_secret,
            login_url: self.oauth.login_url.clone(),
            redemption_url: self.oauth.redemption_url.clone(),
            redirect_url: self.oauth.redirect_url.clone(),
            scope: self.oauth.scope.clone(),
        })
    }

    /// Session cookie codec keyed with the cookie secret.
    pub fn cookie_codec(&self) -> common::Result<CookieCodec> {
        let seed = self
            .cookie
            .secret
            .clone()
            .ok_or_else(|| common::Error::Config("missing cookie secret".into()))?;
        Ok(CookieCodec::new(
            self.cookie.name.clone(),
            seed,
            Duration::from_secs(self.cookie.expire_secs),
        ))
    }

    /// Sign-in page message: explicit setting, else derived from the email domain.
    pub fn sign_in_message(&self) -> Option<String> {
        if let Some(message) = &self.proxy.sign_in_message {
            return Some(message.clone());
        }
        match &self.validator {
            ValidatorConfig::AllowList {
                email_domain: Some(domain),
                ..
            } if !domain.is_empty() => Some(format!("Authenticate using {domain}")),
            _ => None,
        }
    }
}

/// Read a secret from `env_var`, falling back to `file`.
///
/// Whitespace is trimmed; an empty value counts as missing.
fn resolve_secret(
    env_var: &str,
    file: Option<&Path>,
    file_field: &str,
) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.trim().is_empty() {
            return Ok(Some(Secret::new(value.trim().to_owned())));
        }
    }
    if let Some(path) = file {
        let value = std::fs::read_to_string(path).map_err(|e| {
            common::Error::Config(format!(
                "failed to read {file_field} {}: {e}",
                path.display()
            ))
        })?;
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Some(Secret::new(value)));
        }
    }
    Err(common::Error::Config(format!(
        "missing secret: set {env_var} or {file_field}"
    )))
}

/// RFC 6265 cookie-name token characters
fn is_valid_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic()
                && !matches!(
                    b,
                    b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"'
                        | b'/' | b'[' | b']' | b'?' | b'=' | b'{' | b'}'
                )
        })
}
