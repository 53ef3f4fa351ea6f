//! Rollback controller.
//!
//! ```text
//! INIT → HEALTH_GATE(inactive) → CUTOVER → POST_ROLLBACK → [CLEANUP] → DONE
//! ```
//!
//! Targets the slot that is inactive now, which is the one that served
//! before the last cutover. Traffic moves in a single step. The slot being
//! abandoned is left running unless cleanup was asked for explicitly.

use slotswap_core::{Deployment, Operation, Outcome, Phase};
use slotswap_hooks::HookEvent;
use slotswap_proxy::Schedule;

use crate::context::DeployContext;
use crate::error::{DeployError, DeployFailure, DeployResult};
use crate::manual::stop_slot;
use crate::pipeline::shift;
use crate::run::{self, Run};

#[derive(Clone)]
pub struct RollbackController {
    ctx: DeployContext,
}

impl RollbackController {
    pub fn new(ctx: DeployContext) -> Self {
        Self { ctx }
    }

    /// Move all traffic back to the inactive slot and make it active.
    ///
    /// `core.FORCE` proceeds past an unhealthy target; `core.CLEAN` stops
    /// the abandoned slot afterwards.
    pub async fn rollback(&self) -> Result<Deployment, DeployFailure> {
        let ctx = &self.ctx;

        // INIT
        let guard = run::lock(ctx, Operation::Rollback, None).await?;
        let env = run::environments(ctx, Operation::Rollback, None, false)?;
        let target = env.inactive();

        let mut run = Run::start(ctx, Operation::Rollback, None, target);
        let result = execute(&mut run, &env).await;
        let outcome = match result {
            Ok(()) => Ok(run.succeed(Outcome::RolledBack)),
            Err(e) => Err(run.fail(e).await),
        };

        run::unlock(guard);
        outcome
    }
}

async fn execute(run: &mut Run<'_>, env: &slotswap_state::EnvironmentRecord) -> DeployResult<()> {
    let ctx = run.ctx;
    let app = ctx.app().to_string();
    let from = env.active;
    let target = env.inactive();
    let endpoint = env.slot(target).endpoint.clone();
    let clean = ctx.clean()?;

    run.gate(HookEvent::PreRollback { env: target }).await?;

    run.enter(Phase::HealthGate)?;
    if let Some(attempts) = run.health_gate(target, &endpoint).await? {
        return Err(DeployError::RollbackTargetUnhealthy {
            slot: target,
            attempts,
        });
    }

    run.enter(Phase::Cutover)?;
    shift(run, None, from, target, &Schedule::atomic(), endpoint, false).await?;
    ctx.store.flip_active(&app, target)?;
    run.commit();

    run.enter(Phase::PostRollback)?;
    run.notify(HookEvent::PostRollback { env: target }).await;

    if clean {
        run.enter(Phase::Cleanup)?;
        // The rollback is already committed; a failed stop is reported,
        // not fatal.
        if let Err(e) = stop_slot(run, from).await {
            run.warn("cleanup", format!("stopping {from} failed: {e}"));
        }
    }
    Ok(())
}
