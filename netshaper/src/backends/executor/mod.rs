// Command execution backends
//
// Every kernel change goes through a `CommandExecutor`. Commands are argument
// vectors, never shell strings, so nothing is re-tokenized or interpolated by
// a shell on the way to `tc`, `ip`, `iptables` or `modprobe`.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

pub mod dry_run;
pub mod system;

#[cfg(test)]
pub mod testing;

pub use dry_run::DryRunExecutor;
pub use system::SystemExecutor;

/// A fully tokenized external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    program: String,
    args: Vec<String>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Why a single command invocation failed
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The process could not be started (missing binary, permissions, ...)
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully
    #[error("`{command}` failed ({status}): {diagnostic}")]
    NonZero {
        command: String,
        status: String,
        diagnostic: String,
    },

    /// The process did not finish in time and was killed
    #[error("`{command}` did not finish within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

impl ExecError {
    /// The command line that failed
    pub fn command(&self) -> &str {
        match self {
            ExecError::Spawn { command, .. }
            | ExecError::NonZero { command, .. }
            | ExecError::TimedOut { command, .. } => command,
        }
    }

    /// Captured diagnostic text (stderr, falling back to stdout)
    pub fn diagnostic(&self) -> String {
        match self {
            ExecError::Spawn { source, .. } => source.to_string(),
            ExecError::NonZero { diagnostic, .. } => diagnostic.clone(),
            ExecError::TimedOut { timeout, .. } => format!("timed out after {:?}", timeout),
        }
    }
}

/// Runs one external configuration command per call. No retries.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Backend name (e.g., "system", "dry_run")
    fn name(&self) -> &'static str;

    /// Run the command, returning its trimmed stdout on success
    async fn execute(&self, command: &ShellCommand) -> Result<String, ExecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_arguments() {
        let cmd = ShellCommand::new("tc")
            .args(["qdisc", "del", "dev"])
            .arg("eth0")
            .arg("root");
        assert_eq!(cmd.to_string(), "tc qdisc del dev eth0 root");
        assert_eq!(cmd.program(), "tc");
        assert_eq!(cmd.get_args().len(), 5);
    }

    #[test]
    fn test_arguments_are_not_split() {
        let cmd = ShellCommand::new("iptables").arg("10.0.0.1; rm -rf /");
        assert_eq!(cmd.get_args(), ["10.0.0.1; rm -rf /"]);
    }

    #[test]
    fn test_diagnostic_text() {
        let err = ExecError::NonZero {
            command: "tc qdisc del dev eth0 root".to_string(),
            status: "exit status: 2".to_string(),
            diagnostic: "Error: Cannot delete qdisc with handle of zero.".to_string(),
        };
        assert_eq!(err.command(), "tc qdisc del dev eth0 root");
        assert!(err.diagnostic().contains("handle of zero"));
        assert!(err.to_string().contains("exit status: 2"));
    }
}
