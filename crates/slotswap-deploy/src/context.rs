//! Settings and collaborators shared by every controller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use slotswap_core::options::{CORE_CLEAN, CORE_FORCE, CORE_SKIP_HEALTH_CHECK};
use slotswap_core::{ConfigResult, Endpoint, SlotswapConfig};
use slotswap_health::HealthProber;
use slotswap_hooks::HookDispatcher;
use slotswap_proxy::{Schedule, ShiftTarget, TrafficShifter};
use slotswap_state::{LockManager, StateStore};

use crate::error::DeployResult;
use crate::runtime::ContainerRuntime;

/// Values read once from `slotswap.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySettings {
    pub app: String,
    pub blue: Endpoint,
    pub green: Endpoint,
    pub schedule: Schedule,
    /// Probe the target after every traffic step.
    pub verify_each_step: bool,
    pub lock_timeout: Duration,
    /// Bound on each container runtime call.
    pub runtime_timeout: Duration,
}

impl DeploySettings {
    pub fn from_config(config: &SlotswapConfig) -> ConfigResult<Self> {
        Ok(Self {
            app: config.app.name.clone(),
            blue: config.environments.endpoint(slotswap_core::Slot::Blue),
            green: config.environments.endpoint(slotswap_core::Slot::Green),
            schedule: Schedule::new(config.traffic.schedule.clone()),
            verify_each_step: config.health.verify_each_step,
            lock_timeout: config.lock.timeout()?,
            runtime_timeout: config.runtime.command_timeout()?,
        })
    }
}

/// Everything a controller run touches.
///
/// Cloning is cheap; collaborators are shared.
#[derive(Clone)]
pub struct DeployContext {
    pub settings: DeploySettings,
    pub store: StateStore,
    pub locks: LockManager,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub prober: HealthProber,
    pub shifter: TrafficShifter,
    pub hooks: HookDispatcher,
    /// Set to `true` to stop at the next phase boundary.
    pub stop: watch::Receiver<bool>,
}

impl DeployContext {
    pub fn app(&self) -> &str {
        &self.settings.app
    }

    pub fn shift_target(&self) -> ShiftTarget {
        ShiftTarget {
            app: self.settings.app.clone(),
            health_path: self.prober.policy().path.clone(),
            blue: self.settings.blue.clone(),
            green: self.settings.green.clone(),
        }
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    pub fn force(&self) -> DeployResult<bool> {
        Ok(self.hooks.options().get_bool(CORE_FORCE)?)
    }

    pub fn skip_health_check(&self) -> DeployResult<bool> {
        Ok(self.hooks.options().get_bool(CORE_SKIP_HEALTH_CHECK)?)
    }

    pub fn clean(&self) -> DeployResult<bool> {
        Ok(self.hooks.options().get_bool(CORE_CLEAN)?)
    }
}
