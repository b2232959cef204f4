// Validated shaping parameters
//
// Requests arrive as plain integers. Each value is checked here before any
// kernel command is built, so a rejected request has no side effects.

use super::Direction;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

/// A parameter outside its domain
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("rate_kbit must be > 0 (got {0})")]
    RateNotPositive(i64),

    #[error("rate_kbit {0} is too large")]
    RateTooLarge(i64),

    #[error("{field} must be 0-100 (got {value})")]
    PercentOutOfRange { field: &'static str, value: i64 },

    #[error("ms must be >= 0 (got {0})")]
    NegativeDelay(i64),

    #[error("delay {0}ms is too large")]
    DelayTooLarge(i64),

    #[error("port must be 1-65535 (got {0})")]
    Port(i64),

    #[error("mark must be > 0 (got {0})")]
    Mark(i64),

    #[error("remote_ip must not be empty")]
    EmptyRemote,

    #[error("remote_ip {0:?} is not an IPv4 address, IPv4 CIDR or host name")]
    InvalidRemote(String),

    #[error("direction in is not supported: marked flows are shaped on egress")]
    InboundMark,
}

/// Egress bandwidth in kbit/s, always > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RateKbit(u32);

impl RateKbit {
    pub fn new(rate_kbit: i64) -> Result<Self, ValidationError> {
        if rate_kbit <= 0 {
            return Err(ValidationError::RateNotPositive(rate_kbit));
        }
        u32::try_from(rate_kbit)
            .map(Self)
            .map_err(|_| ValidationError::RateTooLarge(rate_kbit))
    }
}

impl fmt::Display for RateKbit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}kbit", self.0)
    }
}

/// Loss percentage in 0..=100
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Percent(u8);

impl Percent {
    pub fn new(value: i64) -> Result<Self, ValidationError> {
        Self::named("percent", value)
    }

    /// Like `new`, but names the offending field in the error
    pub fn named(field: &'static str, value: i64) -> Result<Self, ValidationError> {
        match u8::try_from(value) {
            Ok(v) if v <= 100 => Ok(Self(v)),
            _ => Err(ValidationError::PercentOutOfRange { field, value }),
        }
    }

    /// Clamp to 100 instead of rejecting; for compile-time defaults
    pub const fn saturating(value: u8) -> Self {
        if value > 100 { Self(100) } else { Self(value) }
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Induced delay in milliseconds, >= 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DelayMs(u32);

impl DelayMs {
    pub fn new(ms: i64) -> Result<Self, ValidationError> {
        if ms < 0 {
            return Err(ValidationError::NegativeDelay(ms));
        }
        u32::try_from(ms)
            .map(Self)
            .map_err(|_| ValidationError::DelayTooLarge(ms))
    }
}

impl fmt::Display for DelayMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

pub fn validate_port(port: i64) -> Result<u16, ValidationError> {
    match u16::try_from(port) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(ValidationError::Port(port)),
    }
}

pub fn validate_mark(mark: i64) -> Result<u32, ValidationError> {
    match u32::try_from(mark) {
        Ok(m) if m > 0 => Ok(m),
        _ => Err(ValidationError::Mark(mark)),
    }
}

/// Marks are matched in OUTPUT, so only outbound flows can be shaped
pub fn validate_direction(direction: Direction) -> Result<Direction, ValidationError> {
    match direction {
        Direction::Out => Ok(direction),
        Direction::In => Err(ValidationError::InboundMark),
    }
}

/// Accepts an IPv4 address, IPv4 CIDR or host name. The rule goes through
/// iptables and a `protocol ip` filter, so IPv6 is rejected, as is anything
/// that could be read as an option or split into several arguments.
pub fn validate_remote(remote: &str) -> Result<String, ValidationError> {
    let remote = remote.trim();
    if remote.is_empty() {
        return Err(ValidationError::EmptyRemote);
    }

    let valid = match remote.split_once('/') {
        Some((addr, prefix)) => {
            addr.parse::<Ipv4Addr>().is_ok()
                && !prefix.is_empty()
                && prefix.chars().all(|c| c.is_ascii_digit())
                && prefix.parse::<u8>().is_ok_and(|p| p <= 32)
        }
        None if remote.parse::<Ipv4Addr>().is_ok() => true,
        None => is_host_name(remote),
    };

    if valid {
        Ok(remote.to_string())
    } else {
        Err(ValidationError::InvalidRemote(remote.to_string()))
    }
}

// Digits-and-dots strings that failed to parse as IPv4 are bad addresses,
// not names
fn is_host_name(name: &str) -> bool {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_');
    !name.starts_with('-')
        && name.chars().all(allowed)
        && !name.chars().all(|c| c.is_ascii_digit() || c == '.')
}
