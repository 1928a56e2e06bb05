//! External filter command execution
//!
//! The engine only knows [`CommandExecutor`]: hand over an nft script, get back
//! success or an [`Error::Nftables`]. [`NftExecutor`] is the production
//! implementation and feeds the script to `nft -f -` on stdin.

use crate::core::error::{Error, NftablesErrorPattern, Result};
use crate::elevation::{Elevation, elevated_command_line};
use std::future::Future;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};

/// Capability to run nft scripts against the packet filter.
///
/// Implementations must not retry or time out on their own; the result of one
/// call is the result the engine reports.
pub trait CommandExecutor: Send + Sync + 'static {
    fn execute(&self, script: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Runs scripts through a real `nft` process (optionally elevated).
#[derive(Debug, Clone)]
pub struct NftExecutor {
    program: String,
    args: Vec<String>,
}

impl NftExecutor {
    /// Creates an executor from a full argv prefix, e.g. `["sudo", "-n", "nft"]`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `command` is empty.
    pub fn new(command: Vec<String>) -> Result<Self> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("nft command line is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Creates an executor for `command` after applying the elevation policy.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the command is empty or the elevation helper is missing.
    pub fn elevated(command: &[String], method: Elevation) -> Result<Self> {
        Self::new(elevated_command_line(command, method)?)
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Spawns the command with `extra` args and writes `script` to its stdin.
    async fn run(&self, extra: &[&str], script: &str) -> Result<Output> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(extra)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!("Failed to spawn {}: {e}", self.program);
                Error::Nftables {
                    message: format!("failed to spawn {}: {e}", self.program),
                    stderr: None,
                    exit_code: None,
                }
            })?;

        // nft may exit before reading everything (EPIPE); its exit status and
        // stderr are still the result worth reporting
        let written = match child.stdin.take() {
            Some(mut stdin) => match stdin.write_all(script.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            },
            None => Ok(()),
        };

        let output = child.wait_with_output().await?;
        match written {
            Err(e) if output.status.success() => {
                error!("Failed to write script to {}: {e}", self.program);
                Err(Error::Nftables {
                    message: format!("failed to write script to {}: {e}", self.program),
                    stderr: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
                    exit_code: output.status.code(),
                })
            }
            Err(e) => {
                debug!("{} closed stdin early: {e}", self.program);
                Ok(output)
            }
            Ok(()) => Ok(output),
        }
    }

    /// Dry-runs `script` with `nft --check`. Returns the raw process output so the
    /// caller can decide how to report failures.
    ///
    /// # Errors
    ///
    /// Returns `Err` only if the process could not be run at all.
    pub async fn check(&self, script: &str) -> Result<Output> {
        self.run(&["--check", "-f", "-"], script).await
    }
}

impl CommandExecutor for NftExecutor {
    async fn execute(&self, script: &str) -> Result<()> {
        debug!("nft script: {script}");
        let output = self.run(&["-f", "-"], script).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let translation = NftablesErrorPattern::match_error(&stderr);
            error!(
                "nft failed (exit {:?}): {stderr} ({})",
                output.status.code(),
                translation.user_message
            );
            Err(Error::Nftables {
                message: if stderr.is_empty() {
                    format!("nft exited with {}", output.status)
                } else {
                    stderr.clone()
                },
                stderr: Some(stderr),
                exit_code: output.status.code(),
            })
        }
    }
}
