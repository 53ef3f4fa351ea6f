use std::process::ExitCode;

use serde_json::json;

use slotswap_core::{Deployment, Slot};
use slotswap_state::{EnvironmentRecord, LockInfo};

use super::{Globals, is_lock_held, load_plugins, lock_manager, open_store};

pub async fn status(globals: &Globals, limit: usize, as_json: bool) -> anyhow::Result<ExitCode> {
    let config = globals.load_config()?;
    let app = config.app.name.clone();
    let lock = lock_manager(&config)?.holder(&app)?;
    let store = match open_store(&config).await {
        Ok(store) => store,
        Err(e) if is_lock_held(&e) => {
            return busy(&app, lock, as_json);
        }
        Err(e) => return Err(e),
    };
    let record = store.get_environments(&app)?;
    let history = store.list_deployments(&app, limit)?;

    if as_json {
        let value = json!({
            "app": app,
            "environments": record,
            "lock": lock,
            "deployments": history,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(ExitCode::SUCCESS);
    }

    let Some(record) = record else {
        println!("{app}: not deployed yet");
        return Ok(ExitCode::SUCCESS);
    };

    println!("{app}");
    for slot in [record.active, record.inactive()] {
        println!("  {}", slot_line(&record, slot));
    }
    match lock {
        Some(info) => println!("  lock      held by {info}"),
        None => println!("  lock      free"),
    }

    if !history.is_empty() {
        println!();
        println!("recent:");
        for deployment in &history {
            println!("  {}", history_line(deployment));
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Status while another operation has the store open: only the lock is
/// readable.
fn busy(app: &str, lock: Option<LockInfo>, as_json: bool) -> anyhow::Result<ExitCode> {
    if as_json {
        let value = json!({
            "app": app,
            "busy": true,
            "lock": lock,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(ExitCode::SUCCESS);
    }
    println!("{app}");
    match lock {
        Some(info) => println!("  lock      held by {info}"),
        None => println!("  lock      free"),
    }
    println!("  state is unavailable while another slotswap process runs");
    Ok(ExitCode::SUCCESS)
}

fn slot_line(record: &EnvironmentRecord, slot: Slot) -> String {
    let state = record.slot(slot);
    format!(
        "{:<9} {:<5} {:>3}%  {:<21} version={} group={}",
        record.role(slot).to_string(),
        slot,
        record.traffic.weight(slot),
        state.endpoint.address(),
        state.version.as_deref().unwrap_or("-"),
        state.container_group_id.as_deref().unwrap_or("-"),
    )
}

fn history_line(d: &Deployment) -> String {
    let outcome = d.outcome.map(|o| o.to_string()).unwrap_or_else(|| "running".to_string());
    let mut line = format!(
        "{} {:<8} {:<8} → {:<5} {}",
        d.started_at,
        d.operation.to_string(),
        d.version.as_deref().unwrap_or("-"),
        d.target,
        outcome,
    );
    if let Some(failure) = &d.failure {
        line.push_str(&format!(" ({}: {})", failure.kind, failure.message));
    }
    if !d.warnings.is_empty() {
        line.push_str(&format!(" [{} warnings]", d.warnings.len()));
    }
    line
}

pub fn unlock(globals: &Globals) -> anyhow::Result<ExitCode> {
    let config = globals.load_config()?;
    let app = &config.app.name;
    let locks = lock_manager(&config)?;

    match locks.holder(app)? {
        Some(info) => {
            locks.force_release(app)?;
            println!("✓ removed lock on {app} held by {info}");
        }
        None => println!("{app} is not locked"),
    }
    Ok(ExitCode::SUCCESS)
}

pub fn options(globals: &Globals) -> anyhow::Result<ExitCode> {
    let config = globals.load_config()?;
    let overrides = globals.overrides(&[])?;
    let plugins = load_plugins(&config, &overrides)?;

    for (key, default, help) in plugins.table.describe() {
        let value = plugins.options.get(key).unwrap_or(default);
        println!("{key:<40} {value:<12} {help}");
    }
    Ok(ExitCode::SUCCESS)
}
