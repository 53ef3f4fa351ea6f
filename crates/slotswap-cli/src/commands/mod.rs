//! Command implementations and the wiring they share.

pub mod deploy;
pub mod status;
pub mod traffic;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{debug, warn};

use slotswap_core::options::parse_override;
use slotswap_core::{Deployment, OptionsTable, ResolvedOptions, SlotswapConfig};
use slotswap_deploy::{DeployContext, DeployError, DeployFailure, DeploySettings};
use slotswap_health::{HealthPolicy, HealthProber};
use slotswap_hooks::{HookDispatcher, HookRegistry};
use slotswap_proxy::{FileReloader, TrafficShifter};
use slotswap_state::{LockManager, StateError, StateStore};

use crate::compose::ComposeRuntime;

const STORE_RETRY: Duration = Duration::from_millis(200);

/// Flags accepted by every command.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    pub config: PathBuf,
    pub app_name: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub overrides: Vec<String>,
}

impl Globals {
    /// Read the configuration file and apply `--app-name`/`--state-dir`.
    pub fn load_config(&self) -> anyhow::Result<SlotswapConfig> {
        let mut config = SlotswapConfig::from_file(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;
        if let Some(name) = &self.app_name {
            config.app.name = name.clone();
        }
        if let Some(dir) = &self.state_dir {
            config.app.state_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// `--set` pairs followed by the dedicated flags that are on.
    pub fn overrides(&self, flags: &[(&str, bool)]) -> anyhow::Result<Vec<(String, String)>> {
        let mut pairs = self
            .overrides
            .iter()
            .map(|raw| parse_override(raw))
            .collect::<Result<Vec<_>, _>>()?;
        pairs.extend(
            flags
                .iter()
                .filter(|(_, on)| *on)
                .map(|(key, _)| (key.to_string(), "true".to_string())),
        );
        Ok(pairs)
    }
}

/// Loaded plugins plus the options they resolve to.
pub struct Plugins {
    pub table: OptionsTable,
    pub registry: HookRegistry,
    pub options: ResolvedOptions,
}

pub fn load_plugins(
    config: &SlotswapConfig,
    overrides: &[(String, String)],
) -> anyhow::Result<Plugins> {
    let mut table = OptionsTable::new();
    let registry = HookRegistry::load(&slotswap_plugins::builtin(config.app_state_dir()), &mut table)?;
    let options = table.resolve(config, overrides)?;
    debug!(plugins = ?registry.plugins(), handlers = registry.len(), "plugins loaded");
    Ok(Plugins {
        table,
        registry,
        options,
    })
}

/// Open the application's store, waiting up to `lock.timeout` while
/// another process has it open.
///
/// The store stays open for a whole operation, so a second process finds
/// it busy while a deployment runs. That surfaces as
/// [`DeployError::LockHeld`] naming the deployment lock's holder.
pub async fn open_store(config: &SlotswapConfig) -> anyhow::Result<StateStore> {
    let dir = config.app_state_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join("state.redb");

    let deadline = tokio::time::Instant::now() + config.lock.timeout()?;
    loop {
        match StateStore::open(&path) {
            Ok(store) => return Ok(store),
            Err(StateError::Busy(_)) if tokio::time::Instant::now() < deadline => {
                debug!(path = %path.display(), "state store busy, waiting");
                tokio::time::sleep(STORE_RETRY).await;
            }
            Err(StateError::Busy(p)) => {
                let holder = lock_manager(config)?
                    .holder(&config.app.name)?
                    .map(|info| info.to_string())
                    .unwrap_or_else(|| format!("another slotswap process has {} open", p.display()));
                return Err(DeployError::LockHeld {
                    app: config.app.name.clone(),
                    holder,
                }
                .into());
            }
            Err(e) => return Err(e).with_context(|| format!("opening {}", path.display())),
        }
    }
}

pub fn lock_manager(config: &SlotswapConfig) -> anyhow::Result<LockManager> {
    Ok(LockManager::new(
        config.app_state_dir().join("locks"),
        config.lock.stale_after()?,
    ))
}

/// Build a controller context from configuration and flags.
pub async fn build_context(
    globals: &Globals,
    flags: &[(&str, bool)],
    stop: watch::Receiver<bool>,
) -> anyhow::Result<DeployContext> {
    let config = globals.load_config()?;
    let overrides = globals.overrides(flags)?;
    let plugins = load_plugins(&config, &overrides)?;

    let settings = DeploySettings::from_config(&config)?;
    let store = open_store(&config).await?;
    let locks = lock_manager(&config)?;

    let prober = HealthProber::http(HealthPolicy::from_config(&config.health)?);
    let reloader = FileReloader::new(
        &config.proxy.config_path,
        config.proxy.reload_command.clone(),
        config.proxy.reload_timeout()?,
    );
    let shifter = TrafficShifter::new(Arc::new(reloader), config.traffic.observation_window()?);
    let hooks = HookDispatcher::new(
        Arc::new(plugins.registry),
        Arc::new(plugins.options),
        config.hooks.timeout()?,
    );
    let runtime = ComposeRuntime::new(
        &config.runtime.compose_file,
        config.runtime.project_prefix.clone(),
    );

    Ok(DeployContext {
        settings,
        store,
        locks,
        runtime: Arc::new(runtime),
        prober,
        shifter,
        hooks,
        stop,
    })
}

/// Stop channel raised by Ctrl-C.
pub fn stop_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("stop requested; finishing the current phase");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Print the result of a controller run and pick the exit code.
pub fn report(result: Result<Deployment, DeployFailure>) -> ExitCode {
    match result {
        Ok(deployment) => {
            let outcome = deployment
                .outcome
                .map(|o| o.to_string())
                .unwrap_or_default();
            match &deployment.version {
                Some(version) => println!(
                    "✓ {} {version} finished: {outcome}, {} now serving",
                    deployment.operation, deployment.target
                ),
                None => println!(
                    "✓ {} finished: {outcome} ({})",
                    deployment.operation, deployment.target
                ),
            }
            print_warnings(&deployment);
            println!("  id: {}", deployment.id);
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("✗ {failure}");
            eprintln!("  kind: {}", failure.kind());
            print_warnings(&failure.deployment);
            eprintln!("  id: {}", failure.deployment.id);
            ExitCode::FAILURE
        }
    }
}

/// Whether `err` reports another operation holding the application.
pub fn is_lock_held(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<DeployError>(), Some(DeployError::LockHeld { .. }))
}

fn print_warnings(deployment: &Deployment) {
    for w in &deployment.warnings {
        eprintln!("  warning [{}]: {}", w.source, w.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &std::path::Path, extra: &str) -> PathBuf {
        let path = dir.join("slotswap.toml");
        let state = dir.join("state");
        let content = format!(
            "[app]\nname = \"shop\"\nstate_dir = \"{}\"\n{extra}",
            state.display()
        );
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn flags_override_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path(), "[plugins.db]\nDB_ROLLBACK = false\n");
        let globals = Globals {
            config,
            app_name: Some("shop-eu".to_string()),
            overrides: vec!["plugin.audit.AUDIT_ENABLED=false".to_string()],
            ..Globals::default()
        };

        let config = globals.load_config().unwrap();
        assert_eq!(config.app.name, "shop-eu");

        let overrides = globals
            .overrides(&[("plugin.db.DB_ROLLBACK", true), ("core.CLEAN", false)])
            .unwrap();
        let plugins = load_plugins(&config, &overrides).unwrap();

        assert!(plugins.options.get_bool("plugin.db.DB_ROLLBACK").unwrap());
        assert!(!plugins.options.get_bool("core.CLEAN").unwrap());
        assert!(!plugins.options.get_bool("plugin.audit.AUDIT_ENABLED").unwrap());
        assert_eq!(plugins.options.get("core.APP_NAME"), Some("shop-eu"));
    }

    #[test]
    fn unknown_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let globals = Globals {
            config: write_config(dir.path(), ""),
            overrides: vec!["plugin.ssl.SSL_ENABLED=true".to_string()],
            ..Globals::default()
        };
        let config = globals.load_config().unwrap();
        let overrides = globals.overrides(&[]).unwrap();

        assert!(load_plugins(&config, &overrides).is_err());
    }

    #[test]
    fn missing_config_names_the_file() {
        let globals = Globals {
            config: PathBuf::from("/nonexistent/slotswap.toml"),
            ..Globals::default()
        };
        let err = globals.load_config().unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/slotswap.toml"));
    }

    #[tokio::test]
    async fn context_wires_every_collaborator() {
        let dir = tempfile::tempdir().unwrap();
        let globals = Globals {
            config: write_config(dir.path(), "[traffic]\nschedule = [[50, 50], [0, 100]]\n"),
            ..Globals::default()
        };
        let (_tx, rx) = watch::channel(false);

        let ctx = build_context(&globals, &[("core.FORCE", true)], rx).await.unwrap();

        assert_eq!(ctx.app(), "shop");
        assert_eq!(ctx.settings.schedule.len(), 2);
        assert!(ctx.force().unwrap());
        assert!(!ctx.skip_health_check().unwrap());
        assert!(dir.path().join("state").join("shop").join("state.redb").exists());
    }

    #[tokio::test]
    async fn busy_store_reports_the_lock_holder() {
        let dir = tempfile::tempdir().unwrap();
        let globals = Globals {
            config: write_config(dir.path(), ""),
            ..Globals::default()
        };
        let config = globals.load_config().unwrap();

        let _open = open_store(&config).await.unwrap();
        let _guard = lock_manager(&config)
            .unwrap()
            .acquire("shop", "deploy v7", Duration::ZERO)
            .await
            .unwrap();

        let err = open_store(&config).await.unwrap_err();
        assert!(is_lock_held(&err), "{err:#}");
        match err.downcast_ref::<DeployError>() {
            Some(e) => {
                assert_eq!(e.kind(), slotswap_deploy::ErrorKind::LockHeld);
                assert!(e.to_string().contains("deploy v7"), "{e}");
            }
            None => panic!("expected a deploy error, got {err:#}"),
        }
    }
}
