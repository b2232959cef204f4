use super::params::ValidationError;
use crate::backends::executor::ExecError;
use serde::Serialize;

/// How a failure should be surfaced to whoever issued the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// Parameter out of domain; nothing was touched
    BadRequest,
    /// A kernel command failed partway through a sequence
    Operational,
}

#[derive(Debug, thiserror::Error)]
pub enum ShapeError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecError),
}

impl ShapeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ShapeError::Invalid(_) => ErrorClass::BadRequest,
            ShapeError::Execution(_) => ErrorClass::Operational,
        }
    }

    /// Client-facing detail: the validation message, or the captured
    /// diagnostic of the failed command
    pub fn detail(&self) -> String {
        match self {
            ShapeError::Invalid(e) => e.to_string(),
            ShapeError::Execution(e) => e.diagnostic(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let invalid = ShapeError::from(ValidationError::RateNotPositive(0));
        assert_eq!(invalid.class(), ErrorClass::BadRequest);
        assert_eq!(invalid.detail(), "rate_kbit must be > 0 (got 0)");

        let failed = ShapeError::from(ExecError::NonZero {
            command: "tc qdisc add dev eth0 ingress".to_string(),
            status: "exit status: 2".to_string(),
            diagnostic: "RTNETLINK answers: Operation not permitted".to_string(),
        });
        assert_eq!(failed.class(), ErrorClass::Operational);
        assert_eq!(failed.detail(), "RTNETLINK answers: Operation not permitted");
    }
}
