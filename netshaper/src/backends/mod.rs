// Kernel-facing backends: command execution and traffic shaping

pub mod executor;
pub mod shaping;
