use std::process::ExitCode;

use tracing::info;

use slotswap_core::options::{CORE_CLEAN, CORE_FORCE, CORE_SKIP_HEALTH_CHECK};
use slotswap_deploy::{DeployPipeline, RollbackController};
use slotswap_plugins::command::DB_ROLLBACK;

use super::{Globals, build_context, report, stop_on_ctrl_c};

pub async fn deploy(
    globals: &Globals,
    version: &str,
    force: bool,
    skip_health_check: bool,
) -> anyhow::Result<ExitCode> {
    let flags = [(CORE_FORCE, force), (CORE_SKIP_HEALTH_CHECK, skip_health_check)];
    let ctx = build_context(globals, &flags, stop_on_ctrl_c()).await?;
    info!(app = %ctx.app(), %version, "deploying");

    let result = DeployPipeline::new(ctx).deploy(version).await;
    Ok(report(result))
}

pub async fn rollback(
    globals: &Globals,
    force: bool,
    db_rollback: bool,
    clean: bool,
) -> anyhow::Result<ExitCode> {
    let flags = [(CORE_FORCE, force), (DB_ROLLBACK, db_rollback), (CORE_CLEAN, clean)];
    let ctx = build_context(globals, &flags, stop_on_ctrl_c()).await?;
    info!(app = %ctx.app(), "rolling back");

    let result = RollbackController::new(ctx).rollback().await;
    Ok(report(result))
}
