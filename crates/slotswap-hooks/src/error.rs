//! Hook errors.

use thiserror::Error;

use crate::name::HookName;

#[derive(Debug, Error)]
pub enum HookError {
    /// A gating hook refused; the calling phase must not continue.
    #[error("{hook} hook from plugin {plugin} failed: {message}")]
    Failed {
        hook: HookName,
        plugin: String,
        message: String,
    },

    #[error("unknown hook name: {0:?}")]
    UnknownHook(String),
}
