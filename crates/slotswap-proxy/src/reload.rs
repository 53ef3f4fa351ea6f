//! Applying a rendered configuration to the running proxy.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::render::RenderedConfig;

/// Makes the proxy serve a new configuration.
///
/// Implementations must be a reload, not a restart: in-flight requests are
/// not dropped. On error the proxy must still be serving the previous
/// configuration.
#[async_trait]
pub trait ProxyReloader: Send + Sync {
    async fn reload(&self, config: &RenderedConfig) -> ProxyResult<()>;
}

/// Writes the configuration to a file, then runs a reload command.
#[derive(Debug, Clone)]
pub struct FileReloader {
    path: PathBuf,
    command: Vec<String>,
    timeout: Duration,
}

impl FileReloader {
    /// An empty `command` only writes the file.
    pub fn new(path: impl Into<PathBuf>, command: Vec<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            command,
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_atomic(&self, contents: &str) -> ProxyResult<()> {
        let write_err = |source| ProxyError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let tmp = self.path.with_extension("slotswap.tmp");
        tokio::fs::write(&tmp, contents).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        Ok(())
    }

    async fn run_command(&self) -> ProxyResult<()> {
        let Some((program, args)) = self.command.split_first() else {
            return Ok(());
        };

        debug!(%program, ?args, "running proxy reload command");
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProxyError::Reload(format!("failed to run {program}: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProxyError::Timeout(self.timeout))?
            .map_err(|e| ProxyError::Reload(format!("{program}: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ProxyError::Reload(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl ProxyReloader for FileReloader {
    async fn reload(&self, config: &RenderedConfig) -> ProxyResult<()> {
        let previous = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(ProxyError::Write {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        self.write_atomic(&config.text).await?;

        if let Err(e) = self.run_command().await {
            // The proxy kept its old configuration; put the file back so
            // the next reload does not pick up the rejected one.
            let restored = match &previous {
                Some(text) => self.write_atomic(text).await,
                None => tokio::fs::remove_file(&self.path)
                    .await
                    .map_err(|source| ProxyError::Write {
                        path: self.path.clone(),
                        source,
                    }),
            };
            if let Err(restore_err) = restored {
                warn!(path = %self.path.display(), error = %restore_err, "failed to restore proxy configuration");
            }
            return Err(e);
        }

        info!(path = %self.path.display(), traffic = %config.traffic, "proxy reloaded");
        Ok(())
    }
}
