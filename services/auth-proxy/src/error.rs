//! Per-request gate errors
//!
//! Startup failures live in `common::Error` and abort the process. Everything
//! here is handled inside the request: the gate renders it as an error page
//! or the sign-in page and the server keeps running.

use axum::http::StatusCode;
use thiserror::Error;

/// Why the gate refused to complete a handshake or forward a request.
#[derive(Error, Debug)]
pub enum GateError {
    /// The provider redirected back with an `error` parameter
    #[error("provider denied authorization: {0}")]
    ProviderDenied(String),

    /// The callback carried no `code`, an empty one, or more than one
    #[error("callback must carry exactly one code parameter")]
    MalformedCallback,

    #[error("code redemption failed: {0}")]
    Redemption(#[from] oauth_client::Error),

    /// The identity validator rejected the authenticated principal
    #[error("principal rejected by {0} validator")]
    ValidationDenied(String),

    #[error("no session cookie")]
    MissingSession,

    #[error(transparent)]
    SessionInvalid(#[from] session_cookie::VerifyError),
}

impl GateError {
    /// HTTP status of the page rendered for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ProviderDenied(_)
            | Self::ValidationDenied(_)
            | Self::MissingSession
            | Self::SessionInvalid(_) => StatusCode::FORBIDDEN,
            Self::MalformedCallback | Self::Redemption(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Page heading paired with the status code.
    pub fn title(&self) -> &'static str {
        if self.status() == StatusCode::FORBIDDEN {
            "Permission Denied"
        } else {
            "Internal Error"
        }
    }

    /// Message shown to the user. Provider response bodies are kept out of it.
    pub fn public_message(&self) -> String {
        match self {
            Self::ProviderDenied(reason) => reason.clone(),
            Self::MalformedCallback => "Invalid API response".to_string(),
            Self::Redemption(_) => "Unable to redeem the authorization code".to_string(),
            Self::ValidationDenied(_) => "Invalid Account".to_string(),
            Self::MissingSession | Self::SessionInvalid(_) => "Please sign in".to_string(),
        }
    }
}
