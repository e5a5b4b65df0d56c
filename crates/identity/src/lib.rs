//! Identity validation for authenticated principals
//!
//! Defines the `IdentityValidator` trait that decouples the auth gate from
//! the authorization policy. `AllowListValidator` approves by email domain or
//! an explicit address list; `CommandValidator` delegates the decision to an
//! external program.

pub mod allow_list;
pub mod command;
pub mod error;

pub use allow_list::AllowListValidator;
pub use command::CommandValidator;
pub use error::{Error, Result};

use common::Secret;
use std::future::Future;
use std::pin::Pin;

/// The identity produced by a successful code redemption.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Account email, when the provider reports one
    pub email: Option<String>,
    pub access_token: Secret<String>,
}

impl Principal {
    pub fn new(access_token: Secret<String>, email: Option<String>) -> Self {
        Self {
            email,
            access_token,
        }
    }
}

/// Decides whether an authenticated principal may use the proxy.
///
/// Implementations must not fail: any internal problem is a denial.
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn IdentityValidator>`).
pub trait IdentityValidator: Send + Sync {
    /// Identifier for logging (e.g. "allow_list", "command")
    fn id(&self) -> &str;

    /// Approve (`true`) or deny (`false`) the principal.
    fn validate<'a>(
        &'a self,
        principal: &'a Principal,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}
