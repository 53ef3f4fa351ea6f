//! JSON-lines audit trail.
//!
//! Every hook invocation appends one object:
//!
//! ```json
//! {"ts":1700000000,"app":"shop","deployment_id":"…","hook":"post_cutover","target":"green"}
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use slotswap_core::{ConfigResult, Namespace, OptionsTable};
use slotswap_hooks::{HookContext, HookEvent, HookHandler, HookName, HookRegistry, Plugin};

pub const NAMESPACE: &str = "audit";
pub const AUDIT_ENABLED: &str = "plugin.audit.AUDIT_ENABLED";
pub const AUDIT_LOG: &str = "plugin.audit.AUDIT_LOG";

#[derive(Serialize)]
struct Entry<'a> {
    ts: u64,
    app: &'a str,
    deployment_id: &'a str,
    #[serde(flatten)]
    event: &'a HookEvent,
}

/// Records every hook to an append-only file.
///
/// `AUDIT_LOG` overrides the default path given at construction.
#[derive(Debug)]
pub struct AuditPlugin {
    default_log: PathBuf,
    // serializes appends from concurrent runs in one process
    write: Mutex<()>,
}

impl AuditPlugin {
    pub fn new(default_log: impl Into<PathBuf>) -> Self {
        Self {
            default_log: default_log.into(),
            write: Mutex::new(()),
        }
    }

    fn log_path(&self, ctx: &HookContext) -> PathBuf {
        match ctx.options.get(AUDIT_LOG) {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => self.default_log.clone(),
        }
    }

    async fn append(&self, path: &Path, line: &[u8]) -> anyhow::Result<()> {
        let _guard = self.write.lock().await;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        file.write_all(line).await?;
        file.flush().await?;
        Ok(())
    }
}

impl Plugin for AuditPlugin {
    fn id(&self) -> &str {
        NAMESPACE
    }

    fn declare(&self, options: &mut OptionsTable) -> ConfigResult<()> {
        let ns = Namespace::plugin(NAMESPACE);
        options.declare(&ns, "AUDIT_ENABLED", "true", "append hook events to the audit log")?;
        options.declare(&ns, "AUDIT_LOG", "", "audit log path (default: <state_dir>/audit.jsonl)")
    }

    fn register(self: Arc<Self>, registry: &mut HookRegistry) {
        for hook in HookName::ALL {
            registry.register(hook, NAMESPACE, self.clone());
        }
    }
}

#[async_trait]
impl HookHandler for AuditPlugin {
    async fn call(&self, ctx: &HookContext) -> anyhow::Result<()> {
        if !ctx.options.get_bool(AUDIT_ENABLED)? {
            return Ok(());
        }
        let entry = Entry {
            ts: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            app: &ctx.app,
            deployment_id: &ctx.deployment_id,
            event: &ctx.event,
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let path = self.log_path(ctx);
        self.append(&path, &line).await?;
        debug!(hook = %ctx.hook(), path = %path.display(), "audit entry written");
        Ok(())
    }
}
