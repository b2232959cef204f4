// RuleManager sequences shaping primitives against the kernel

use super::ifb_redirect::IngressRedirect;
use super::linux_iptables_utils::{clear_marks, mark_flow};
use super::linux_tc_utils::{
    Netem, clear_root, install_bandwidth_limit, install_mark_filter, replace_root_netem,
};
use super::params::{self, DelayMs, Percent, RateKbit};
use super::plan::{Step, run_steps};
use super::{Direction, FlowMark, ShapeError, ShapingMode, ShapingStatus};
use crate::backends::executor::CommandExecutor;
use std::sync::{PoisonError, RwLock};
use tokio::sync::Mutex;

/// Loss applied to marked flows when the request does not name one
pub const DEFAULT_MARK_LOSS_PERCENT: u8 = 50;

/// Parameters of a mark-and-limit request, before validation
#[derive(Debug, Clone)]
pub struct MarkRequest {
    pub remote: String,
    pub port: i64,
    pub mark: i64,
    pub direction: Direction,
    pub loss_percent: Option<i64>,
}

/// Manages the shaping state of one interface and its redirect device
///
/// Every mutating operation holds `kernel` for its whole command sequence, so
/// two requests never interleave their steps. The status snapshot sits behind
/// its own lock and can be read while a sequence is running.
pub struct RuleManager {
    interface: String,
    executor: Box<dyn CommandExecutor>,
    mark_loss: Percent,
    kernel: Mutex<IngressRedirect>,
    status: RwLock<ShapingStatus>,
}

impl RuleManager {
    pub fn new(
        interface: impl Into<String>,
        redirect_device: impl Into<String>,
        executor: Box<dyn CommandExecutor>,
    ) -> Self {
        let interface = interface.into();
        let redirect = IngressRedirect::new(interface.clone(), redirect_device);

        let status = ShapingStatus {
            interface: interface.clone(),
            redirect_device: redirect.device().to_string(),
            mode: ShapingMode::Unknown,
            redirect_active: false,
            flow_marks: Vec::new(),
            changed_at: None,
        };

        log::info!(
            "Managing {} (redirect device {}, executor {})",
            interface,
            redirect.device(),
            executor.name()
        );

        Self {
            interface,
            executor,
            mark_loss: Percent::saturating(DEFAULT_MARK_LOSS_PERCENT),
            kernel: Mutex::new(redirect),
            status: RwLock::new(status),
        }
    }

    /// Loss applied to marked flows when a request leaves it out
    pub fn with_mark_loss(mut self, loss: Percent) -> Self {
        self.mark_loss = loss;
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Current snapshot. Does not wait for a running sequence.
    pub fn status(&self) -> ShapingStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_status(&self, f: impl FnOnce(&mut ShapingStatus)) -> ShapingStatus {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
        status.changed_at = Some(chrono::Utc::now());
        status.clone()
    }

    /// Run a sequence that rebuilds the root qdisc and record `mode` if it
    /// completes. A failure partway leaves the kernel as it is; the recorded
    /// mode becomes unknown.
    async fn apply_root(
        &self,
        steps: &[Step],
        mode: ShapingMode,
    ) -> Result<ShapingStatus, ShapeError> {
        match run_steps(self.executor.as_ref(), steps).await {
            Ok(()) => {
                log::info!("{}: {:?}", self.interface, mode);
                Ok(self.update_status(|s| s.mode = mode))
            }
            Err(e) => {
                self.update_status(|s| s.mode = ShapingMode::Unknown);
                Err(e.into())
            }
        }
    }

    /// Limit egress bandwidth with an HTB root
    pub async fn set_egress_bandwidth(&self, rate_kbit: i64) -> Result<ShapingStatus, ShapeError> {
        let rate = RateKbit::new(rate_kbit)?;

        let _kernel = self.kernel.lock().await;
        let mut steps = clear_root(&self.interface);
        steps.extend(install_bandwidth_limit(&self.interface, rate));

        self.apply_root(&steps, ShapingMode::BandwidthLimited { rate_kbit: rate })
            .await
    }

    /// Drop `percent` of egress packets
    pub async fn set_egress_loss(&self, percent: i64) -> Result<ShapingStatus, ShapeError> {
        let percent = Percent::new(percent)?;

        let _kernel = self.kernel.lock().await;
        let steps = replace_root_netem(&self.interface, Netem::Loss(percent));

        self.apply_root(&steps, ShapingMode::EgressLoss { percent })
            .await
    }

    /// Delay every egress packet by `ms`
    pub async fn set_egress_delay(&self, ms: i64) -> Result<ShapingStatus, ShapeError> {
        let delay = DelayMs::new(ms)?;

        let _kernel = self.kernel.lock().await;
        let steps = replace_root_netem(&self.interface, Netem::Delay(delay));

        self.apply_root(&steps, ShapingMode::EgressDelay { delay_ms: delay })
            .await
    }

    /// Drop `percent` of ingress packets via the redirect device. Independent
    /// of the egress mode.
    pub async fn set_ingress_loss(&self, percent: i64) -> Result<ShapingStatus, ShapeError> {
        let percent = Percent::new(percent)?;

        let mut redirect = self.kernel.lock().await;
        let result = redirect.install(self.executor.as_ref(), percent).await;

        let present = redirect.is_present();
        let status = self.update_status(|s| s.redirect_active = present);
        result?;
        Ok(status)
    }

    /// Mark outbound TCP traffic of one flow and shape only marked packets.
    ///
    /// The mark rule is appended to any existing ones, but the root qdisc is
    /// replaced: whatever egress mode was active before is gone.
    pub async fn mark_and_limit(&self, request: MarkRequest) -> Result<ShapingStatus, ShapeError> {
        params::validate_direction(request.direction)?;
        let flow = FlowMark {
            remote: params::validate_remote(&request.remote)?,
            port: params::validate_port(request.port)?,
            mark: params::validate_mark(request.mark)?,
        };
        let loss = match request.loss_percent {
            Some(loss) => Percent::named("loss", loss)?,
            None => self.mark_loss,
        };

        let _kernel = self.kernel.lock().await;

        run_steps(self.executor.as_ref(), &mark_flow(&flow)).await?;
        log::info!("Marked tcp to {}:{} with {}", flow.remote, flow.port, flow.mark);
        self.update_status(|s| s.flow_marks.push(flow.clone()));

        let steps = install_mark_filter(&self.interface, flow.mark, loss);
        self.apply_root(
            &steps,
            ShapingMode::MarkedFlowLimited {
                flow,
                loss_percent: loss,
            },
        )
        .await
    }

    /// Remove all shaping: root qdisc, ingress redirect and redirect device.
    /// Every step is best effort, so this succeeds on an already clean system.
    pub async fn clear_shaping(&self) -> Result<ShapingStatus, ShapeError> {
        let mut redirect = self.kernel.lock().await;

        run_steps(self.executor.as_ref(), &clear_root(&self.interface)).await?;
        redirect.teardown(self.executor.as_ref()).await;

        log::info!("{}: shaping cleared", self.interface);
        Ok(self.update_status(|s| {
            s.mode = ShapingMode::Unconfigured;
            s.redirect_active = false;
        }))
    }

    /// Flush every mark rule. Does not touch the egress mode.
    pub async fn clear_marks(&self) -> Result<ShapingStatus, ShapeError> {
        let _kernel = self.kernel.lock().await;

        run_steps(self.executor.as_ref(), &clear_marks()).await?;

        log::info!("Flushed mark rules");
        Ok(self.update_status(|s| s.flow_marks.clear()))
    }

    /// Bring unknown startup state to a clean baseline
    pub async fn reconcile(&self) -> Result<ShapingStatus, ShapeError> {
        log::info!("Resetting shaping state on {}", self.interface);
        self.clear_shaping().await
    }
}
