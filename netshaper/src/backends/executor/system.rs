// Executor that spawns real processes

use super::{CommandExecutor, ExecError, ShellCommand};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Runs commands on the host, killing any that outlive `timeout`
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    timeout: Duration,
}

impl SystemExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandExecutor for SystemExecutor {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn execute(&self, command: &ShellCommand) -> Result<String, ExecError> {
        log::debug!("Running: {}", command);

        let child = Command::new(command.program())
            .args(command.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                command: command.to_string(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ExecError::Spawn {
                command: command.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(ExecError::TimedOut {
                    command: command.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let diagnostic = if stderr.is_empty() { stdout } else { stderr };

        Err(ExecError::NonZero {
            command: command.to_string(),
            status: output.status.to_string(),
            diagnostic,
        })
    }
}
