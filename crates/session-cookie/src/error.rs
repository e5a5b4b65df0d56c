//! Verification failures
//!
//! Every variant means the same thing to the caller (no session); the split
//! exists for logs.

/// Why a session token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("malformed session token: {0}")]
    Malformed(&'static str),

    #[error("session token signature mismatch")]
    BadSignature,

    #[error("session token expired {age_secs}s after issue (max {max_age_secs}s)")]
    Expired { age_secs: u64, max_age_secs: u64 },

    #[error("session token issued in the future")]
    FromFuture,
}

/// Result alias for verification.
pub type Result<T> = std::result::Result<T, VerifyError>;
