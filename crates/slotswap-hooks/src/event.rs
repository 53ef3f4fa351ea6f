//! Hook payloads.

use std::sync::Arc;

use serde::Serialize;

use slotswap_core::{ResolvedOptions, Slot};

use crate::name::HookName;

/// A lifecycle event with the arguments its hook receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "hook", rename_all = "snake_case")]
pub enum HookEvent {
    PreDeploy { version: String, app: String },
    PostDeploy { version: String, env: Slot },
    PreCutover { target: Slot },
    PostCutover { target: Slot },
    PostHealth { env: Slot, healthy: bool },
    PostTrafficShift { version: Option<String>, target: Slot, blue: u8, green: u8 },
    PreRollback { env: Slot },
    PostRollback { env: Slot },
    Cleanup { env: Option<Slot> },
    Error { phase: String, message: String },
}

impl HookEvent {
    pub fn name(&self) -> HookName {
        match self {
            HookEvent::PreDeploy { .. } => HookName::PreDeploy,
            HookEvent::PostDeploy { .. } => HookName::PostDeploy,
            HookEvent::PreCutover { .. } => HookName::PreCutover,
            HookEvent::PostCutover { .. } => HookName::PostCutover,
            HookEvent::PostHealth { .. } => HookName::PostHealth,
            HookEvent::PostTrafficShift { .. } => HookName::PostTrafficShift,
            HookEvent::PreRollback { .. } => HookName::PreRollback,
            HookEvent::PostRollback { .. } => HookName::PostRollback,
            HookEvent::Cleanup { .. } => HookName::Cleanup,
            HookEvent::Error { .. } => HookName::Error,
        }
    }

    /// Event arguments as flat string pairs, for plugins that hand them
    /// to external programs.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            HookEvent::PreDeploy { version, app } => {
                vec![("version", version.clone()), ("app", app.clone())]
            }
            HookEvent::PostDeploy { version, env } => {
                vec![("version", version.clone()), ("env", env.to_string())]
            }
            HookEvent::PreCutover { target } | HookEvent::PostCutover { target } => {
                vec![("target", target.to_string())]
            }
            HookEvent::PostHealth { env, healthy } => {
                vec![("env", env.to_string()), ("healthy", healthy.to_string())]
            }
            HookEvent::PostTrafficShift {
                version,
                target,
                blue,
                green,
            } => {
                let mut fields = vec![
                    ("target", target.to_string()),
                    ("blue", blue.to_string()),
                    ("green", green.to_string()),
                ];
                if let Some(version) = version {
                    fields.insert(0, ("version", version.clone()));
                }
                fields
            }
            HookEvent::PreRollback { env } | HookEvent::PostRollback { env } => {
                vec![("env", env.to_string())]
            }
            HookEvent::Cleanup { env } => env
                .map(|env| vec![("env", env.to_string())])
                .unwrap_or_default(),
            HookEvent::Error { phase, message } => {
                vec![("phase", phase.clone()), ("message", message.clone())]
            }
        }
    }
}

/// Everything a handler sees for one invocation.
///
/// Handlers get read-only access: the event, the resolved options, and
/// identifiers for correlating their own records.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub app: String,
    pub deployment_id: String,
    pub event: HookEvent,
    pub options: Arc<ResolvedOptions>,
}

impl HookContext {
    pub fn hook(&self) -> HookName {
        self.event.name()
    }
}
