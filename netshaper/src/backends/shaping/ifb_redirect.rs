// Ingress redirect controller
//
// Ingress qdiscs cannot carry netem, so inbound traffic is redirected to an
// IFB device and shaped on that device's egress. This controller owns the
// device's existence; the loss value itself lives only in the kernel.

use super::linux_tc_utils::{
    ensure_redirect_device, install_ingress_redirect, remove_ingress_redirect,
};
use super::params::Percent;
use super::plan::run_steps;
use crate::backends::executor::{CommandExecutor, ExecError};

pub const DEFAULT_REDIRECT_DEVICE: &str = "ifb0";

#[derive(Debug)]
pub struct IngressRedirect {
    interface: String,
    device: String,
    present: bool,
}

impl IngressRedirect {
    pub fn new(interface: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            device: device.into(),
            present: false,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Whether the device may exist: set once its creation step has run,
    /// cleared by teardown
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Make sure the device exists and is up. Safe to repeat.
    pub async fn ensure(&mut self, executor: &dyn CommandExecutor) -> Result<(), ExecError> {
        log::debug!("Ensuring redirect device {}", self.device);
        let result = run_steps(executor, &ensure_redirect_device(&self.device)).await;
        // Only bringing the link up can abort, so the add step has run
        self.present = true;
        result?;
        log::info!("Redirect device {} is up", self.device);
        Ok(())
    }

    /// Redirect all ingress traffic of the interface through the device and
    /// drop `loss` of it there
    pub async fn install(
        &mut self,
        executor: &dyn CommandExecutor,
        loss: Percent,
    ) -> Result<(), ExecError> {
        self.ensure(executor).await?;
        run_steps(
            executor,
            &install_ingress_redirect(&self.interface, &self.device, loss),
        )
        .await?;
        log::info!(
            "Ingress loss {} on {} via {}",
            loss,
            self.interface,
            self.device
        );
        Ok(())
    }

    /// Remove the ingress redirect and the device. Best effort: never fails.
    pub async fn teardown(&mut self, executor: &dyn CommandExecutor) {
        let steps = remove_ingress_redirect(&self.interface, &self.device);
        if let Err(e) = run_steps(executor, &steps).await {
            log::warn!("Redirect teardown for {} incomplete: {}", self.device, e);
        }
        self.present = false;
    }
}
