//! Operator-driven operations: manual cutover and explicit cleanup.

use tracing::{info, warn};

use slotswap_core::{Deployment, Operation, Outcome, Phase, Slot, TrafficState, WeightError};
use slotswap_hooks::HookEvent;
use slotswap_state::EnvironmentRecord;

use crate::context::DeployContext;
use crate::error::{DeployError, DeployFailure, DeployResult};
use crate::run::{self, Run};

/// `cutover --target <slot> [--blue-weight N --green-weight N]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoverRequest {
    pub target: Slot,
    /// Explicit `(blue, green)` weights. `None` means all on `target`.
    pub weights: Option<(u16, u16)>,
}

impl CutoverRequest {
    pub fn full(target: Slot) -> Self {
        Self {
            target,
            weights: None,
        }
    }

    pub fn traffic(&self) -> Result<TrafficState, WeightError> {
        match self.weights {
            Some((blue, green)) => TrafficState::new(blue, green),
            None => Ok(TrafficState::all_on(self.target)),
        }
    }
}

/// Single-step traffic change with an optional flip.
///
/// Weights that put everything on the target run `pre_cutover`, flip the
/// active marker and run `post_cutover`. Anything else only changes the
/// proxy and the stored weights. The target must keep a non-zero weight.
#[derive(Clone)]
pub struct CutoverController {
    ctx: DeployContext,
}

impl CutoverController {
    pub fn new(ctx: DeployContext) -> Self {
        Self { ctx }
    }

    pub async fn cutover(&self, request: CutoverRequest) -> Result<Deployment, DeployFailure> {
        let ctx = &self.ctx;
        let guard = run::lock(ctx, Operation::Cutover, None).await?;
        let env = run::environments(ctx, Operation::Cutover, None, false)?;

        let mut run = Run::start(ctx, Operation::Cutover, None, request.target);
        let result = execute_cutover(&mut run, &env, request).await;
        let outcome = match result {
            Ok(()) => Ok(run.succeed(Outcome::Success)),
            Err(e) => Err(run.fail(e).await),
        };

        run::unlock(guard);
        outcome
    }
}

async fn execute_cutover(
    run: &mut Run<'_>,
    env: &EnvironmentRecord,
    request: CutoverRequest,
) -> DeployResult<()> {
    let ctx = run.ctx;
    let app = ctx.app().to_string();
    let target = request.target;
    let traffic = request
        .traffic()
        .map_err(|e| DeployError::InvalidSchedule(e.to_string()))?;
    // A zero-weight target would leave all traffic on a slot that is not active.
    if traffic.weight(target) == 0 {
        return Err(DeployError::InvalidSchedule(format!(
            "cutover to {target} with {traffic} sends it no traffic"
        )));
    }
    let full = traffic.is_all_on(target);
    let flips = full && env.active != target;

    if flips {
        // Gate before traffic moves so a refusal leaves the proxy alone.
        run.gate(HookEvent::PreCutover { target }).await?;
    }

    run.enter(Phase::TrafficShift)?;
    ctx.shifter.apply(&ctx.shift_target(), traffic).await?;
    ctx.store.set_traffic(&app, traffic)?;
    run.notify(HookEvent::PostTrafficShift {
        version: None,
        target,
        blue: traffic.blue(),
        green: traffic.green(),
    })
    .await;

    if flips {
        run.enter(Phase::Cutover)?;
        ctx.store.flip_active(&app, target)?;
        run.commit();
        run.notify(HookEvent::PostCutover { target }).await;
    } else {
        info!(%app, %target, %traffic, active = %env.active, "weights changed without flipping");
    }
    Ok(())
}

/// Stops the inactive slot.
///
/// Refuses while the inactive slot still receives traffic.
#[derive(Clone)]
pub struct CleanupController {
    ctx: DeployContext,
}

impl CleanupController {
    pub fn new(ctx: DeployContext) -> Self {
        Self { ctx }
    }

    pub async fn cleanup(&self) -> Result<Deployment, DeployFailure> {
        let ctx = &self.ctx;
        let guard = run::lock(ctx, Operation::Cleanup, None).await?;
        let env = run::environments(ctx, Operation::Cleanup, None, false)?;
        let inactive = env.inactive();

        let mut run = Run::start(ctx, Operation::Cleanup, None, inactive);
        let result = execute_cleanup(&mut run, &env).await;
        let outcome = match result {
            Ok(()) => Ok(run.succeed(Outcome::Success)),
            Err(e) => Err(run.fail(e).await),
        };

        run::unlock(guard);
        outcome
    }
}

async fn execute_cleanup(run: &mut Run<'_>, env: &EnvironmentRecord) -> DeployResult<()> {
    let inactive = env.inactive();
    let weight = env.traffic.weight(inactive);
    if weight > 0 {
        return Err(DeployError::TrafficOnInactive {
            slot: inactive,
            weight,
        });
    }
    run.enter(Phase::Cleanup)?;
    stop_slot(run, inactive).await
}

/// Stop `slot` unless it is already down, forget its container group and
/// broadcast `cleanup`.
pub(crate) async fn stop_slot(run: &mut Run<'_>, slot: Slot) -> DeployResult<()> {
    let ctx = run.ctx;
    let app = ctx.app().to_string();

    let running = match run
        .runtime_call("is_running", ctx.runtime.is_running(&app, slot))
        .await
    {
        Ok(running) => running,
        Err(e) => {
            warn!(%app, %slot, error = %e, "could not inspect environment, stopping anyway");
            true
        }
    };
    if running {
        run.runtime_call("stop_environment", ctx.runtime.stop_environment(&app, slot))
            .await?;
        info!(%app, %slot, "environment stopped");
    } else {
        info!(%app, %slot, "environment already down");
    }
    ctx.store.set_slot_runtime(&app, slot, None, None)?;

    run.notify(HookEvent::Cleanup { env: Some(slot) }).await;
    Ok(())
}
