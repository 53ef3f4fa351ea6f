//! Bookkeeping shared by all controllers: phases, hooks, lock, failure path.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use slotswap_core::{
    Deployment, Endpoint, Operation, Outcome, Phase, Slot, TrafficState, Warning,
};
use slotswap_hooks::{DispatchReport, HookEvent};
use slotswap_proxy::{StepObserver, StepVerdict};
use slotswap_state::{EnvironmentRecord, LockGuard, StateError, epoch_secs};

use crate::context::DeployContext;
use crate::error::{DeployError, DeployFailure, DeployResult};

/// Deployment ids: start time in nanoseconds plus a process-local counter.
pub(crate) fn new_id() -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{nanos:x}-{:x}-{n}", std::process::id())
}

/// Take the application lock, or fail before any record exists.
pub(crate) async fn lock(
    ctx: &DeployContext,
    operation: Operation,
    version: Option<&str>,
) -> Result<LockGuard, DeployFailure> {
    let holder = match version {
        Some(v) => format!("{operation} {v}"),
        None => operation.to_string(),
    };
    ctx.locks
        .acquire(ctx.app(), &holder, ctx.settings.lock_timeout)
        .await
        .map_err(|e| before_start(ctx, operation, version, e.into()))
}

/// Load the markers, or fail before any record exists.
pub(crate) fn environments(
    ctx: &DeployContext,
    operation: Operation,
    version: Option<&str>,
    create: bool,
) -> Result<EnvironmentRecord, DeployFailure> {
    let result = if create {
        ctx.store
            .ensure_environments(ctx.app(), ctx.settings.blue.clone(), ctx.settings.green.clone())
            .map_err(DeployError::from)
    } else {
        match ctx.store.get_environments(ctx.app()) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(DeployError::NotInitialized(ctx.app().to_string())),
            Err(e) => Err(e.into()),
        }
    };
    result.map_err(|e| before_start(ctx, operation, version, e))
}

/// A failure in `INIT`, before the target slot is known for certain.
fn before_start(
    ctx: &DeployContext,
    operation: Operation,
    version: Option<&str>,
    error: DeployError,
) -> DeployFailure {
    let target = ctx
        .store
        .get_environments(ctx.app())
        .ok()
        .flatten()
        .map(|r| r.inactive())
        .unwrap_or(Slot::Green);
    let mut deployment = Deployment::new(
        new_id(),
        ctx.app(),
        operation,
        version.map(str::to_string),
        target,
        epoch_secs(),
    );
    deployment.fail(error.kind().as_str(), error.to_string(), epoch_secs());
    error!(app = %ctx.app(), %operation, error = %error, "failed before start");
    DeployFailure {
        deployment: Box::new(deployment),
        error,
    }
}

/// Release the lock, logging I/O errors.
pub(crate) fn unlock(guard: LockGuard) {
    if let Err(e) = guard.release() {
        warn!(error = %e, "failed to release lock");
    }
}

/// One controller run holding the lock.
pub(crate) struct Run<'a> {
    pub ctx: &'a DeployContext,
    pub deployment: Deployment,
    /// Set once the active marker has moved; later phases ignore stop
    /// requests.
    committed: bool,
}

impl<'a> Run<'a> {
    pub fn start(
        ctx: &'a DeployContext,
        operation: Operation,
        version: Option<String>,
        target: Slot,
    ) -> Self {
        let deployment = Deployment::new(new_id(), ctx.app(), operation, version, target, epoch_secs());
        info!(
            app = %ctx.app(),
            id = %deployment.id,
            %operation,
            version = ?deployment.version,
            %target,
            "run started"
        );
        Self {
            ctx,
            deployment,
            committed: false,
        }
    }

    fn app(&self) -> &str {
        self.ctx.app()
    }

    /// Move to `phase`, honouring a pending stop request first.
    pub fn enter(&mut self, phase: Phase) -> DeployResult<()> {
        if !self.committed && self.ctx.stop_requested() {
            return Err(DeployError::Cancelled {
                phase: self.deployment.phase,
            });
        }
        self.deployment.enter(phase);
        info!(app = %self.app(), id = %self.deployment.id, %phase, "phase entered");
        Ok(())
    }

    /// Record that the active slot has flipped.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub fn warn(&mut self, source: impl Into<String>, message: impl Into<String>) {
        let (source, message) = (source.into(), message.into());
        warn!(app = %self.app(), id = %self.deployment.id, %source, %message, "warning recorded");
        self.deployment.warn(source, message);
    }

    /// Broadcast a gating hook. Any failure aborts the phase.
    pub async fn gate(&mut self, event: HookEvent) -> DeployResult<()> {
        let report = self
            .ctx
            .hooks
            .dispatch(self.ctx.app(), &self.deployment.id, event)
            .await?;
        debug!(hook = %report.hook, invoked = report.invoked, "gating hook passed");
        Ok(())
    }

    /// Broadcast an observational hook. Failures become warnings.
    pub async fn notify(&mut self, event: HookEvent) {
        let result = self
            .ctx
            .hooks
            .dispatch(self.ctx.app(), &self.deployment.id, event)
            .await;
        match result {
            Ok(report) => self.record_report(report),
            Err(e) => self.warn("hooks", e.to_string()),
        }
    }

    fn record_report(&mut self, report: DispatchReport) {
        for failure in report.failures {
            self.deployment.warn(
                format!("hook:{}:{}", failure.hook, failure.plugin),
                failure.message,
            );
        }
    }

    /// Probe `slot`, applying `--skip-health-check` and `--force`.
    ///
    /// Returns `Some(attempts)` only when the gate failed and nothing
    /// overrides it.
    pub async fn health_gate(&mut self, slot: Slot, endpoint: &Endpoint) -> DeployResult<Option<u32>> {
        if self.ctx.skip_health_check()? {
            self.warn("health_gate", format!("health check of {slot} skipped on request"));
            return Ok(None);
        }

        let report = self.ctx.prober.probe(slot, endpoint).await;
        self.notify(HookEvent::PostHealth {
            env: slot,
            healthy: report.is_healthy(),
        })
        .await;

        if report.is_healthy() {
            return Ok(None);
        }
        if self.ctx.force()? {
            self.warn(
                "health_gate",
                format!(
                    "{slot} unhealthy after {} attempts; continuing because force is set",
                    report.attempts
                ),
            );
            return Ok(None);
        }
        Ok(Some(report.attempts))
    }

    /// Persist the record, logging rather than failing.
    fn persist(&self) {
        if let Err(e) = self.ctx.store.put_deployment(&self.deployment) {
            error!(app = %self.app(), id = %self.deployment.id, error = %e, "failed to record deployment");
        }
    }

    pub fn succeed(mut self, outcome: Outcome) -> Deployment {
        self.deployment.finish(outcome, epoch_secs());
        self.persist();
        info!(
            app = %self.app(),
            id = %self.deployment.id,
            %outcome,
            warnings = self.deployment.warnings.len(),
            "run finished"
        );
        self.deployment
    }

    /// The `FAILED` path: put traffic back on the active slot, tell the
    /// `error` hook, record the failure. The caller still holds the lock.
    pub async fn fail(mut self, error: DeployError) -> DeployFailure {
        let phase = self.deployment.phase;
        error!(app = %self.app(), id = %self.deployment.id, %phase, kind = %error.kind(), error = %error, "run failed");

        self.restore_traffic().await;
        self.notify(HookEvent::Error {
            phase: phase.to_string(),
            message: error.to_string(),
        })
        .await;

        self.deployment.fail(error.kind().as_str(), error.to_string(), epoch_secs());
        self.persist();
        DeployFailure {
            deployment: Box::new(self.deployment),
            error,
        }
    }

    /// Make the proxy and the stored weights agree with the active marker.
    async fn restore_traffic(&mut self) {
        let record = match self.ctx.store.get_environments(self.app()) {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                self.warn("restore_traffic", e.to_string());
                return;
            }
        };
        let wanted = TrafficState::all_on(record.active);
        if record.traffic == wanted {
            return;
        }

        warn!(app = %self.app(), from = %record.traffic, to = %wanted, "restoring traffic to active slot");
        if let Err(e) = self.ctx.shifter.apply(&self.ctx.shift_target(), wanted).await {
            self.warn("restore_traffic", format!("proxy still at {}: {e}", record.traffic));
            return;
        }
        if let Err(e) = self.ctx.store.set_traffic(self.app(), wanted) {
            self.warn("restore_traffic", e.to_string());
        }
    }

    /// Bound a runtime call by the configured timeout.
    pub async fn runtime_call<T, F>(&self, what: &str, fut: F) -> DeployResult<T>
    where
        F: std::future::Future<Output = Result<T, crate::error::RuntimeError>>,
    {
        let timeout = self.ctx.settings.runtime_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DeployError::RuntimeUnavailable(format!(
                "{what} did not finish within {timeout:?}"
            ))),
        }
    }
}

/// Step observer used while traffic moves: persists each step, broadcasts
/// `post_traffic_shift`, and optionally re-probes the target.
pub(crate) struct StepRecorder<'a> {
    pub ctx: &'a DeployContext,
    pub deployment_id: String,
    pub version: Option<String>,
    pub target: Slot,
    pub endpoint: Endpoint,
    pub verify: bool,
    pub warnings: Vec<Warning>,
    pub store_error: Option<StateError>,
}

#[async_trait]
impl StepObserver for StepRecorder<'_> {
    async fn on_step(&mut self, index: usize, traffic: TrafficState) -> StepVerdict {
        if let Err(e) = self.ctx.store.set_traffic(self.ctx.app(), traffic) {
            let reason = format!("could not persist traffic state: {e}");
            self.store_error = Some(e);
            return StepVerdict::Abort(reason);
        }

        let event = HookEvent::PostTrafficShift {
            version: self.version.clone(),
            target: self.target,
            blue: traffic.blue(),
            green: traffic.green(),
        };
        match self.ctx.hooks.dispatch(self.ctx.app(), &self.deployment_id, event).await {
            Ok(report) => {
                for failure in report.failures {
                    self.warnings.push(Warning {
                        source: format!("hook:{}:{}", failure.hook, failure.plugin),
                        message: failure.message,
                    });
                }
            }
            Err(e) => self.warnings.push(Warning {
                source: "hooks".to_string(),
                message: e.to_string(),
            }),
        }

        if self.verify {
            let report = self.ctx.prober.probe(self.target, &self.endpoint).await;
            if !report.is_healthy() {
                return StepVerdict::Abort(format!(
                    "{} unhealthy at step {index} ({traffic})",
                    self.target
                ));
            }
        }
        StepVerdict::Continue
    }
}
