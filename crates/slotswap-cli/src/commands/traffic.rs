use std::process::ExitCode;

use slotswap_core::Slot;
use slotswap_deploy::{CleanupController, CutoverController, CutoverRequest};

use super::{Globals, build_context, report, stop_on_ctrl_c};

pub async fn cutover(
    globals: &Globals,
    target: Slot,
    weights: Option<(u16, u16)>,
) -> anyhow::Result<ExitCode> {
    let ctx = build_context(globals, &[], stop_on_ctrl_c()).await?;
    let request = CutoverRequest { target, weights };
    let result = CutoverController::new(ctx).cutover(request).await;
    Ok(report(result))
}

pub async fn cleanup(globals: &Globals) -> anyhow::Result<ExitCode> {
    let ctx = build_context(globals, &[], stop_on_ctrl_c()).await?;
    let result = CleanupController::new(ctx).cleanup().await;
    Ok(report(result))
}
