//! `docker compose` as the container runtime.
//!
//! Each slot is its own compose project, `<prefix>-<slot>`, started from the
//! same compose file. The version and endpoint reach the file through
//! `SLOTSWAP_*` variables:
//!
//! ```yaml
//! services:
//!   web:
//!     image: registry.example.com/shop:${SLOTSWAP_VERSION}
//!     ports: ["${SLOTSWAP_PORT}:8080"]
//! ```

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, info};

use slotswap_core::{Endpoint, Slot};
use slotswap_deploy::{ContainerRuntime, RuntimeError};

#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    /// argv prefix, `["docker", "compose"]` unless overridden.
    program: Vec<String>,
    compose_file: PathBuf,
    project_prefix: Option<String>,
}

impl ComposeRuntime {
    pub fn new(compose_file: impl Into<PathBuf>, project_prefix: Option<String>) -> Self {
        Self {
            program: vec!["docker".to_string(), "compose".to_string()],
            compose_file: compose_file.into(),
            project_prefix,
        }
    }

    pub fn with_program(mut self, program: Vec<String>) -> Self {
        self.program = program;
        self
    }

    pub fn project(&self, app: &str, slot: Slot) -> String {
        let prefix = self.project_prefix.as_deref().unwrap_or(app);
        format!("{prefix}-{slot}")
    }

    fn args(&self, app: &str, slot: Slot, action: &[&str]) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.project(app, slot),
            "-f".to_string(),
            self.compose_file.display().to_string(),
        ];
        args.extend(action.iter().map(|a| a.to_string()));
        args
    }

    async fn run(
        &self,
        args: Vec<String>,
        env: Vec<(&'static str, String)>,
    ) -> Result<String, RuntimeError> {
        let (program, prefix) = self
            .program
            .split_first()
            .ok_or_else(|| RuntimeError::Unavailable("no runtime program configured".to_string()))?;

        debug!(%program, ?args, "running container runtime");
        let output = tokio::process::Command::new(program)
            .args(prefix)
            .args(&args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("{program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::Command(format!(
                "{program} {} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn start_environment(
        &self,
        app: &str,
        slot: Slot,
        version: &str,
        endpoint: &Endpoint,
    ) -> Result<String, RuntimeError> {
        let env = vec![
            ("SLOTSWAP_APP", app.to_string()),
            ("SLOTSWAP_SLOT", slot.to_string()),
            ("SLOTSWAP_VERSION", version.to_string()),
            ("SLOTSWAP_HOST", endpoint.host.clone()),
            ("SLOTSWAP_PORT", endpoint.port.to_string()),
        ];
        let args = self.args(app, slot, &["up", "-d", "--remove-orphans"]);
        self.run(args, env).await?;

        let project = self.project(app, slot);
        info!(%app, %slot, %version, %project, "compose project up");
        Ok(project)
    }

    async fn stop_environment(&self, app: &str, slot: Slot) -> Result<(), RuntimeError> {
        let args = self.args(app, slot, &["down", "--remove-orphans"]);
        self.run(args, Vec::new()).await?;
        info!(%app, %slot, "compose project down");
        Ok(())
    }

    async fn is_running(&self, app: &str, slot: Slot) -> Result<bool, RuntimeError> {
        let args = self.args(app, slot, &["ps", "-q"]);
        let stdout = self.run(args, Vec::new()).await?;
        Ok(!stdout.trim().is_empty())
    }
}
