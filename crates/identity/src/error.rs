//! Validator errors
//!
//! `AllowList` is fatal at startup. `Execution` never leaves the crate as an
//! error: `CommandValidator` logs it and denies.

use std::path::PathBuf;

/// Errors from building or running a validator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load allow list {path}: {reason}")]
    AllowList { path: PathBuf, reason: String },

    #[error("validator command failed: {0}")]
    Execution(String),
}

/// Result alias for validator operations.
pub type Result<T> = std::result::Result<T, Error>;
