//! The closed set of hook names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HookError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookName {
    PreDeploy,
    PostDeploy,
    PreCutover,
    PostCutover,
    PostHealth,
    PostTrafficShift,
    PreRollback,
    PostRollback,
    Cleanup,
    Error,
}

/// Whether a hook failure stops the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookClass {
    Gating,
    Observational,
}

impl HookName {
    pub const ALL: [HookName; 10] = [
        HookName::PreDeploy,
        HookName::PostDeploy,
        HookName::PreCutover,
        HookName::PostCutover,
        HookName::PostHealth,
        HookName::PostTrafficShift,
        HookName::PreRollback,
        HookName::PostRollback,
        HookName::Cleanup,
        HookName::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HookName::PreDeploy => "pre_deploy",
            HookName::PostDeploy => "post_deploy",
            HookName::PreCutover => "pre_cutover",
            HookName::PostCutover => "post_cutover",
            HookName::PostHealth => "post_health",
            HookName::PostTrafficShift => "post_traffic_shift",
            HookName::PreRollback => "pre_rollback",
            HookName::PostRollback => "post_rollback",
            HookName::Cleanup => "cleanup",
            HookName::Error => "error",
        }
    }

    pub fn class(self) -> HookClass {
        match self {
            HookName::PreDeploy | HookName::PreCutover | HookName::PreRollback => HookClass::Gating,
            _ => HookClass::Observational,
        }
    }

    pub fn is_gating(self) -> bool {
        self.class() == HookClass::Gating
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookName {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| HookError::UnknownHook(s.to_string()))
    }
}
