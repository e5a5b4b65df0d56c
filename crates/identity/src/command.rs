//! External-command policy.
//!
//! Runs a configured program with the principal exposed through the
//! environment (`AUTH_TOKEN`, plus `AUTH_EMAIL` when known). Exit status zero
//! approves. Launch failures, non-zero exits and timeouts all deny.
//!
//! The child does not inherit the proxy's environment, which holds the
//! cookie seed and client secret. Only `PATH` is passed through.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::{IdentityValidator, Principal};

/// Environment variable carrying the access token
pub const AUTH_TOKEN_ENV: &str = "AUTH_TOKEN";

/// Environment variable carrying the principal email, when known
pub const AUTH_EMAIL_ENV: &str = "AUTH_EMAIL";

/// Delegates the approve/deny decision to an external program.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandValidator {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Run the program once. `Ok(())` only on exit status zero.
    ///
    /// The child is killed if this future is dropped (client disconnect) or
    /// the timeout elapses.
    async fn run(&self, principal: &Principal) -> Result<()> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd.args(&self.args)
            .env(AUTH_TOKEN_ENV, principal.access_token.expose())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(email) = &principal.email {
            cmd.env(AUTH_EMAIL_ENV, email);
        }

        let status = match tokio::time::timeout(self.timeout, cmd.status()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(Error::Execution(format!(
                    "unable to run {}: {e}",
                    self.program.display()
                )));
            }
            Err(_) => {
                return Err(Error::Execution(format!(
                    "{} did not finish within {:?}",
                    self.program.display(),
                    self.timeout
                )));
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(Error::Execution(format!(
                "{} exited with {status}",
                self.program.display()
            )))
        }
    }
}

impl IdentityValidator for CommandValidator {
    fn id(&self) -> &str {
        "command"
    }

    fn validate<'a>(
        &'a self,
        principal: &'a Principal,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            match self.run(principal).await {
                Ok(()) => {
                    debug!(program = %self.program.display(), "validator command approved principal");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "validator command denied principal");
                    false
                }
            }
        })
    }
}
