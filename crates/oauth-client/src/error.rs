//! Error types for code redemption

/// Errors from the provider redemption call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("redemption request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("redemption failed: {0}")]
    Redemption(String),
}

/// Result alias for OAuth operations.
pub type Result<T> = std::result::Result<T, Error>;
