//! Local Command Execution
//!
//! Runs vendor helpers on the host, optionally behind a root helper such as
//! `sudo`.

use crate::domain::ports::{CommandOutput, CommandRunner};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Runs commands with `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner {
    /// Prefix prepended when root privilege is requested, e.g. `["sudo", "-n"]`.
    /// Empty means the agent already runs with sufficient privilege.
    root_helper: Vec<String>,
}

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a runner from a whitespace-separated root helper command line
    pub fn with_root_helper(root_helper: Option<&str>) -> Self {
        Self {
            root_helper: root_helper
                .map(|h| h.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    /// Program and arguments actually spawned
    fn command_line(&self, program: &str, args: &[&str], as_root: bool) -> Vec<String> {
        let mut line = Vec::with_capacity(self.root_helper.len() + args.len() + 1);
        if as_root {
            line.extend(self.root_helper.iter().cloned());
        }
        line.push(program.to_string());
        line.extend(args.iter().map(|a| a.to_string()));
        line
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str], as_root: bool) -> Result<CommandOutput> {
        let line = self.command_line(program, args, as_root);
        debug!("Executing: {}", line.join(" "));

        let output = Command::new(&line[0])
            .args(&line[1..])
            .output()
            .await
            .map_err(|e| Error::Command {
                command: line.join(" "),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
