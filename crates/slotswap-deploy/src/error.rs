//! Deployment error taxonomy.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use slotswap_core::{ConfigError, Deployment, Phase, Slot, TrafficState};
use slotswap_hooks::HookError;
use slotswap_proxy::ProxyError;
use slotswap_state::{LockError, StateError};

pub type DeployResult<T> = Result<T, DeployError>;

/// Errors from a [`ContainerRuntime`](crate::ContainerRuntime).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container runtime command failed: {0}")]
    Command(String),

    #[error("container runtime did not answer within {0:?}")]
    Timeout(Duration),

    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("another operation on {app} is in progress: {holder}")]
    LockHeld { app: String, holder: String },

    #[error("{slot} never became healthy after {attempts} attempts")]
    HealthCheckFailed { slot: Slot, attempts: u32 },

    #[error("traffic shift aborted at step {step}: {reason} (last good: {last_good})")]
    TrafficShiftAborted {
        step: usize,
        reason: String,
        last_good: TrafficState,
    },

    #[error(transparent)]
    HookFailed(#[from] HookError),

    #[error("{0}")]
    RuntimeUnavailable(String),

    #[error("rollback target {slot} is unhealthy after {attempts} attempts")]
    RollbackTargetUnhealthy { slot: Slot, attempts: u32 },

    #[error("invalid traffic schedule: {0}")]
    InvalidSchedule(String),

    #[error("{0} has never been deployed")]
    NotInitialized(String),

    #[error("inactive slot {slot} still receives {weight}% of traffic")]
    TrafficOnInactive { slot: Slot, weight: u8 },

    #[error("stopped on request after {phase}")]
    Cancelled { phase: Phase },

    #[error(transparent)]
    Lock(LockError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::LockHeld { .. } => ErrorKind::LockHeld,
            DeployError::HealthCheckFailed { .. } => ErrorKind::HealthCheckFailed,
            DeployError::TrafficShiftAborted { .. } => ErrorKind::TrafficShiftAborted,
            DeployError::HookFailed(_) => ErrorKind::HookFailed,
            DeployError::RuntimeUnavailable(_) => ErrorKind::RuntimeUnavailable,
            DeployError::RollbackTargetUnhealthy { .. } => ErrorKind::RollbackTargetUnhealthy,
            DeployError::InvalidSchedule(_) => ErrorKind::InvalidSchedule,
            DeployError::NotInitialized(_) => ErrorKind::NotInitialized,
            DeployError::TrafficOnInactive { .. } => ErrorKind::TrafficOnInactive,
            DeployError::Cancelled { .. } => ErrorKind::Cancelled,
            DeployError::Lock(_) | DeployError::State(_) => ErrorKind::State,
            DeployError::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<LockError> for DeployError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Held { app, holder } => DeployError::LockHeld { app, holder },
            other => DeployError::Lock(other),
        }
    }
}

impl From<RuntimeError> for DeployError {
    fn from(e: RuntimeError) -> Self {
        DeployError::RuntimeUnavailable(e.to_string())
    }
}

impl From<ProxyError> for DeployError {
    fn from(e: ProxyError) -> Self {
        match e {
            ProxyError::EmptySchedule
            | ProxyError::InvalidSchedule { .. }
            | ProxyError::SameSlot(_)
            | ProxyError::Weight(_) => DeployError::InvalidSchedule(e.to_string()),
            ProxyError::InvalidField { .. } => DeployError::Config(ConfigError::Invalid(e.to_string())),
            ProxyError::Write { .. } | ProxyError::Reload(_) | ProxyError::Timeout(_) => {
                DeployError::RuntimeUnavailable(e.to_string())
            }
        }
    }
}

/// Serializable error class, recorded on the [`Deployment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    LockHeld,
    HealthCheckFailed,
    TrafficShiftAborted,
    HookFailed,
    RuntimeUnavailable,
    RollbackTargetUnhealthy,
    InvalidSchedule,
    NotInitialized,
    TrafficOnInactive,
    Cancelled,
    State,
    Config,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::LockHeld => "LockHeld",
            ErrorKind::HealthCheckFailed => "HealthCheckFailed",
            ErrorKind::TrafficShiftAborted => "TrafficShiftAborted",
            ErrorKind::HookFailed => "HookFailed",
            ErrorKind::RuntimeUnavailable => "RuntimeUnavailable",
            ErrorKind::RollbackTargetUnhealthy => "RollbackTargetUnhealthy",
            ErrorKind::InvalidSchedule => "InvalidSchedule",
            ErrorKind::NotInitialized => "NotInitialized",
            ErrorKind::TrafficOnInactive => "TrafficOnInactive",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::State => "State",
            ErrorKind::Config => "Config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run that ended in `FAILED`, with the record of how far it got.
#[derive(Debug, Error)]
#[error("{} failed after {}: {error}", .deployment.operation, failed_in(.deployment))]
pub struct DeployFailure {
    pub deployment: Box<Deployment>,
    #[source]
    pub error: DeployError,
}

impl DeployFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Last phase entered before failing.
    pub fn phase_reached(&self) -> Phase {
        failed_in(&self.deployment)
    }
}

fn failed_in(deployment: &Deployment) -> Phase {
    deployment.failed_in.unwrap_or(deployment.phase)
}
