//! Deployment pipeline controller.
//!
//! ```text
//! INIT → PRE_DEPLOY → ENV_STARTING → HEALTH_GATE → TRAFFIC_SHIFT → CUTOVER
//!      → POST_DEPLOY → CLEANUP → DONE
//! ```
//!
//! Any phase may fail into `FAILED`. The active/inactive flip in `CUTOVER`
//! is the single commit point: it only runs once every gate has passed,
//! so a failure anywhere earlier leaves the previous slot active (and the
//! failure path moves all traffic back to it).

use tracing::info;

use slotswap_core::{Deployment, Endpoint, Operation, Outcome, Phase, Slot, TrafficState};
use slotswap_hooks::HookEvent;
use slotswap_proxy::Schedule;
use slotswap_state::EnvironmentRecord;

use crate::context::DeployContext;
use crate::error::{DeployError, DeployFailure, DeployResult};
use crate::run::{self, Run, StepRecorder};

/// Runs `deploy <version>` for one application.
#[derive(Clone)]
pub struct DeployPipeline {
    ctx: DeployContext,
}

impl DeployPipeline {
    pub fn new(ctx: DeployContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &DeployContext {
        &self.ctx
    }

    /// Deploy `version` to the inactive slot and move traffic onto it.
    pub async fn deploy(&self, version: &str) -> Result<Deployment, DeployFailure> {
        let ctx = &self.ctx;

        // INIT
        let guard = run::lock(ctx, Operation::Deploy, Some(version)).await?;
        let env = run::environments(ctx, Operation::Deploy, Some(version), true)?;

        let mut run = Run::start(ctx, Operation::Deploy, Some(version.to_string()), env.inactive());
        let result = execute(&mut run, version, &env).await;
        let outcome = match result {
            Ok(()) => Ok(run.succeed(Outcome::Success)),
            Err(e) => Err(run.fail(e).await),
        };

        run::unlock(guard);
        outcome
    }
}

async fn execute(run: &mut Run<'_>, version: &str, env: &EnvironmentRecord) -> DeployResult<()> {
    let ctx = run.ctx;
    let app = ctx.app().to_string();
    let from = env.active;
    let target = env.inactive();
    let endpoint = env.slot(target).endpoint.clone();

    let schedule = &ctx.settings.schedule;
    schedule.validate().map_err(DeployError::from)?;
    if !schedule.completes() {
        return Err(DeployError::InvalidSchedule(
            "last step must put 100% on the target".to_string(),
        ));
    }

    run.enter(Phase::PreDeploy)?;
    run.gate(HookEvent::PreDeploy {
        version: version.to_string(),
        app: app.clone(),
    })
    .await?;

    run.enter(Phase::EnvStarting)?;
    let group_id = run
        .runtime_call(
            "start_environment",
            ctx.runtime.start_environment(&app, target, version, &endpoint),
        )
        .await?;
    ctx.store
        .set_slot_runtime(&app, target, Some(version.to_string()), Some(group_id.clone()))?;
    info!(%app, slot = %target, %version, container_group = %group_id, "environment started");

    run.enter(Phase::HealthGate)?;
    if let Some(attempts) = run.health_gate(target, &endpoint).await? {
        return Err(DeployError::HealthCheckFailed {
            slot: target,
            attempts,
        });
    }

    run.enter(Phase::TrafficShift)?;
    let verify = ctx.settings.verify_each_step && !ctx.skip_health_check()?;
    shift(run, Some(version), from, target, schedule, endpoint.clone(), verify).await?;

    run.enter(Phase::Cutover)?;
    run.gate(HookEvent::PreCutover { target }).await?;
    ctx.store.flip_active(&app, target)?;
    run.commit();
    run.notify(HookEvent::PostCutover { target }).await;

    run.enter(Phase::PostDeploy)?;
    run.notify(HookEvent::PostDeploy {
        version: version.to_string(),
        env: target,
    })
    .await;

    run.enter(Phase::Cleanup)?;
    run.notify(HookEvent::Cleanup { env: None }).await;
    Ok(())
}

/// Run the configured schedule through the shifter with a recording observer.
pub(crate) async fn shift(
    run: &mut Run<'_>,
    version: Option<&str>,
    from: Slot,
    to: Slot,
    schedule: &Schedule,
    endpoint: Endpoint,
    verify: bool,
) -> DeployResult<()> {
    let ctx = run.ctx;
    let current = ctx
        .store
        .get_environments(ctx.app())?
        .map(|r| r.traffic)
        .unwrap_or(TrafficState::all_on(from));

    let mut recorder = StepRecorder {
        ctx,
        deployment_id: run.deployment.id.clone(),
        version: version.map(str::to_string),
        target: to,
        endpoint,
        verify,
        warnings: Vec::new(),
        store_error: None,
    };

    let result = ctx
        .shifter
        .shift(
            &ctx.shift_target(),
            from,
            to,
            schedule,
            current,
            &mut recorder,
        )
        .await;
    run.deployment.warnings.append(&mut recorder.warnings);

    let outcome = result?;
    if let Some(e) = recorder.store_error {
        return Err(e.into());
    }
    if let Some(abort) = outcome.aborted {
        ctx.store.set_traffic(ctx.app(), outcome.final_state)?;
        return Err(DeployError::TrafficShiftAborted {
            step: abort.step,
            reason: abort.reason,
            last_good: outcome.final_state,
        });
    }
    Ok(())
}
