//! Shell-command hooks.
//!
//! `[plugins.command]` maps upper-cased hook names to shell commands:
//!
//! ```toml
//! [plugins.command]
//! PRE_DEPLOY = "./scripts/migrate.sh"
//! POST_CUTOVER = "curl -fsS -X POST $NOTIFY_URL"
//! ```
//!
//! The command runs under `SHELL -c` with:
//!
//! - `SLOTSWAP_APP`, `SLOTSWAP_DEPLOYMENT_ID`, `SLOTSWAP_HOOK`
//! - one `SLOTSWAP_<FIELD>` per event argument (`SLOTSWAP_VERSION`, `SLOTSWAP_TARGET`, …)
//! - every resolved plugin option under its bare key (`DB_ROLLBACK`, `AUDIT_LOG`, …)
//! - core options as `SLOTSWAP_<KEY>` (`SLOTSWAP_FORCE`, …)
//!
//! A non-zero exit is a hook failure. Whether that stops the run depends
//! on the hook.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use slotswap_core::{ConfigResult, Namespace, OptionsTable};
use slotswap_hooks::{HookContext, HookHandler, HookName, HookRegistry, Plugin};

pub const NAMESPACE: &str = "command";
pub const SHELL: &str = "plugin.command.SHELL";
pub const DB_NAMESPACE: &str = "db";
pub const DB_ROLLBACK: &str = "plugin.db.DB_ROLLBACK";

/// Longest stderr excerpt carried into a failure message.
const STDERR_TAIL: usize = 512;

#[derive(Debug, Default)]
pub struct CommandPlugin;

impl CommandPlugin {
    pub fn new() -> Self {
        Self
    }
}

/// Option key holding the command for `hook`.
pub fn option_key(hook: HookName) -> String {
    Namespace::plugin(NAMESPACE).key(&hook.as_str().to_ascii_uppercase())
}

/// Environment handed to the command.
pub fn environment(ctx: &HookContext) -> Vec<(String, String)> {
    let mut env = vec![
        ("SLOTSWAP_APP".to_string(), ctx.app.clone()),
        ("SLOTSWAP_DEPLOYMENT_ID".to_string(), ctx.deployment_id.clone()),
        ("SLOTSWAP_HOOK".to_string(), ctx.hook().to_string()),
    ];
    for (field, value) in ctx.event.fields() {
        env.push((format!("SLOTSWAP_{}", field.to_ascii_uppercase()), value));
    }
    for (key, value) in ctx.options.iter() {
        let name = match key.strip_prefix("core.") {
            Some(core) => format!("SLOTSWAP_{core}"),
            None => match key.rsplit_once('.') {
                Some((_, bare)) => bare.to_string(),
                None => continue,
            },
        };
        env.push((name, value.to_string()));
    }
    env
}

impl Plugin for CommandPlugin {
    fn id(&self) -> &str {
        NAMESPACE
    }

    fn declare(&self, options: &mut OptionsTable) -> ConfigResult<()> {
        let ns = Namespace::plugin(NAMESPACE);
        options.declare(&ns, "SHELL", "sh", "shell used to run hook commands")?;
        for hook in HookName::ALL {
            let key = hook.as_str().to_ascii_uppercase();
            options.declare(&ns, &key, "", format!("command run on {hook}"))?;
        }
        options.declare(
            &Namespace::plugin(DB_NAMESPACE),
            "DB_ROLLBACK",
            "false",
            "ask migration commands to roll the schema back",
        )
    }

    fn register(self: Arc<Self>, registry: &mut HookRegistry) {
        for hook in HookName::ALL {
            registry.register(hook, NAMESPACE, self.clone());
        }
    }
}

#[async_trait]
impl HookHandler for CommandPlugin {
    async fn call(&self, ctx: &HookContext) -> anyhow::Result<()> {
        let hook = ctx.hook();
        let key = option_key(hook);
        let script = match ctx.options.get(&key) {
            Some(s) if !s.trim().is_empty() => s,
            _ => return Ok(()),
        };
        let shell = ctx.options.get(SHELL).filter(|s| !s.is_empty()).unwrap_or("sh");

        debug!(%hook, %shell, command = %script, "running hook command");
        let output = tokio::process::Command::new(shell)
            .arg("-c")
            .arg(script)
            .envs(environment(ctx))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // the dispatcher's timeout drops this future
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("could not run {shell}: {e}"))?;

        if output.status.success() {
            info!(%hook, command = %script, "hook command succeeded");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let tail = match stderr.char_indices().rev().nth(STDERR_TAIL) {
            Some((i, _)) => &stderr[i..],
            None => stderr,
        };
        anyhow::bail!("`{script}` exited with {}: {tail}", output.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotswap_core::{ResolvedOptions, Slot};
    use slotswap_hooks::HookEvent;

    fn ctx(event: HookEvent, options: &[(&str, &str)]) -> HookContext {
        HookContext {
            app: "shop".to_string(),
            deployment_id: "d-7".to_string(),
            event,
            options: Arc::new(ResolvedOptions::from_pairs(options.iter().copied())),
        }
    }

    #[test]
    fn option_keys_are_upper_case_hook_names() {
        assert_eq!(option_key(HookName::PreDeploy), "plugin.command.PRE_DEPLOY");
        assert_eq!(
            option_key(HookName::PostTrafficShift),
            "plugin.command.POST_TRAFFIC_SHIFT"
        );
    }

    #[test]
    fn declares_commands_and_db_namespace() {
        let mut options = OptionsTable::new();
        CommandPlugin::new().declare(&mut options).unwrap();

        assert!(options.is_declared(SHELL));
        assert!(options.is_declared(DB_ROLLBACK));
        for hook in HookName::ALL {
            assert!(options.is_declared(&option_key(hook)), "{hook}");
        }
    }

    #[test]
    fn environment_exports_event_and_options() {
        let ctx = ctx(
            HookEvent::PreDeploy {
                version: "v2".to_string(),
                app: "shop".to_string(),
            },
            &[("plugin.db.DB_ROLLBACK", "true"), ("core.FORCE", "false")],
        );

        let env = environment(&ctx);
        let get = |k: &str| env.iter().find(|(n, _)| n == k).map(|(_, v)| v.as_str());

        assert_eq!(get("SLOTSWAP_HOOK"), Some("pre_deploy"));
        assert_eq!(get("SLOTSWAP_DEPLOYMENT_ID"), Some("d-7"));
        assert_eq!(get("SLOTSWAP_VERSION"), Some("v2"));
        assert_eq!(get("DB_ROLLBACK"), Some("true"));
        assert_eq!(get("SLOTSWAP_FORCE"), Some("false"));
    }

    #[tokio::test]
    async fn unconfigured_hook_is_a_no_op() {
        let ctx = ctx(HookEvent::PostRollback { env: Slot::Blue }, &[]);
        CommandPlugin::new().call(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn command_sees_event_fields() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let script = format!("echo \"$SLOTSWAP_TARGET $DB_ROLLBACK\" > {}", out.display());
        let ctx = ctx(
            HookEvent::PostCutover { target: Slot::Green },
            &[
                ("plugin.command.POST_CUTOVER", script.as_str()),
                ("plugin.db.DB_ROLLBACK", "false"),
            ],
        );

        CommandPlugin::new().call(&ctx).await.unwrap();

        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "green false");
    }

    #[tokio::test]
    async fn non_zero_exit_fails_with_stderr() {
        let ctx = ctx(
            HookEvent::PreCutover { target: Slot::Blue },
            &[("plugin.command.PRE_CUTOVER", "echo 'migration locked' >&2; exit 3")],
        );

        let err = CommandPlugin::new().call(&ctx).await.unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("migration locked"), "{msg}");
        assert!(msg.contains('3'), "{msg}");
    }
}
