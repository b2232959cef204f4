// Traffic shaping: rule primitives, the ingress redirect controller and the
// rule manager that sequences them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod ifb_redirect;
pub mod linux_iptables_utils;
pub mod linux_tc_utils;
pub mod manager;
pub mod params;
pub mod plan;

pub use error::{ErrorClass, ShapeError};
pub use manager::{MarkRequest, RuleManager};

/// Direction of a mark request, relative to the managed interface. Only
/// `Out` can be shaped.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Inbound traffic; rejected by validation
    In,
    /// Outbound traffic, matched on destination
    #[default]
    Out,
}

/// An outbound (remote, port) -> mark mapping installed in the mangle table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowMark {
    pub remote: String,
    pub port: u16,
    pub mark: u32,
}

/// The egress configuration currently recorded for the interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ShapingMode {
    /// Kernel state not known: process just started, or a sequence failed
    /// partway and left whatever the kernel now holds
    Unknown,
    Unconfigured,
    BandwidthLimited {
        rate_kbit: params::RateKbit,
    },
    EgressLoss {
        percent: params::Percent,
    },
    EgressDelay {
        delay_ms: params::DelayMs,
    },
    MarkedFlowLimited {
        flow: FlowMark,
        loss_percent: params::Percent,
    },
}

/// Snapshot returned by status queries
#[derive(Debug, Clone, Serialize)]
pub struct ShapingStatus {
    pub interface: String,
    pub redirect_device: String,
    #[serde(flatten)]
    pub mode: ShapingMode,
    pub redirect_active: bool,
    pub flow_marks: Vec<FlowMark>,
    pub changed_at: Option<DateTime<Utc>>,
}
