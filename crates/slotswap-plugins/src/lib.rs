//! slotswap-plugins — plugins shipped with the `slotswap` binary.
//!
//! - [`AuditPlugin`] appends one JSON line per hook invocation
//!   (`plugin.audit.AUDIT_ENABLED`, `plugin.audit.AUDIT_LOG`).
//! - [`CommandPlugin`] runs an operator-supplied shell command per hook
//!   (`plugin.command.<HOOK>`), with event data in `SLOTSWAP_*` variables.
//!   It also owns the `db` namespace so `--db-rollback` reaches migration
//!   scripts as `DB_ROLLBACK`.
//!
//! Both only see what the core passes in the [`HookContext`](slotswap_hooks::HookContext).

pub mod audit;
pub mod command;

use std::path::PathBuf;
use std::sync::Arc;

use slotswap_hooks::Plugin;

pub use audit::AuditPlugin;
pub use command::CommandPlugin;

/// The built-in plugins, in registration order.
pub fn builtin(state_dir: impl Into<PathBuf>) -> Vec<Arc<dyn Plugin>> {
    let audit_log = state_dir.into().join("audit.jsonl");
    vec![
        Arc::new(AuditPlugin::new(audit_log)),
        Arc::new(CommandPlugin::new()),
    ]
}
