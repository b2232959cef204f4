// Ordered command sequences with per-step failure policy

use crate::backends::executor::{CommandExecutor, ExecError, ShellCommand};

/// What a failed step means for the rest of the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Setup step: stop the sequence and report
    Abort,
    /// Teardown of possibly-absent state: failure means already clean
    Tolerate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub command: ShellCommand,
    pub on_failure: OnFailure,
}

impl Step {
    pub fn required(command: ShellCommand) -> Self {
        Self {
            command,
            on_failure: OnFailure::Abort,
        }
    }

    pub fn best_effort(command: ShellCommand) -> Self {
        Self {
            command,
            on_failure: OnFailure::Tolerate,
        }
    }
}

/// Run steps in order. The first failing `Abort` step ends the sequence and
/// its error is returned; steps already applied stay applied.
pub async fn run_steps(executor: &dyn CommandExecutor, steps: &[Step]) -> Result<(), ExecError> {
    for step in steps {
        match executor.execute(&step.command).await {
            Ok(_) => {}
            Err(e) if step.on_failure == OnFailure::Tolerate => {
                log::debug!("Ignoring failure of `{}`: {}", step.command, e.diagnostic());
            }
            Err(e) => {
                log::warn!("Aborting sequence at `{}`: {}", e.command(), e.diagnostic());
                return Err(e);
            }
        }
    }
    Ok(())
}
