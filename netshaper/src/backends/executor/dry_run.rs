// Executor that records commands instead of running them

use super::{CommandExecutor, ExecError, ShellCommand};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};

/// Logs every command and reports success without touching the host.
///
/// Clones share the same record, so the caller can keep one handle and give
/// another to the rule manager.
#[derive(Debug, Clone, Default)]
pub struct DryRunExecutor {
    issued: Arc<Mutex<Vec<ShellCommand>>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the commands issued since the last call
    pub fn take_issued(&self) -> Vec<ShellCommand> {
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *issued)
    }
}

#[async_trait]
impl CommandExecutor for DryRunExecutor {
    fn name(&self) -> &'static str {
        "dry_run"
    }

    async fn execute(&self, command: &ShellCommand) -> Result<String, ExecError> {
        log::info!("[dry-run] {}", command);
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());
        Ok(String::new())
    }
}
