//! slotswap-hooks — lifecycle hooks for independently authored plugins.
//!
//! Plugins are loaded by an explicit registration pass: each [`Plugin`]
//! declares its options into the [`OptionsTable`](slotswap_core::OptionsTable)
//! and registers [`HookHandler`]s under names from the closed
//! [`HookName`] set. The [`HookDispatcher`] then broadcasts [`HookEvent`]s
//! in registration order.
//!
//! `pre_*` hooks gate the calling phase: the first failure stops dispatch
//! and is returned as a [`HookError`]. Every other hook is observational;
//! failures are logged and collected in the [`DispatchReport`].

pub mod dispatch;
pub mod error;
pub mod event;
pub mod name;
pub mod registry;

pub use dispatch::{DispatchReport, HookDispatcher, HookFailure};
pub use error::HookError;
pub use event::{HookContext, HookEvent};
pub use name::{HookClass, HookName};
pub use registry::{FnHook, HookHandler, HookRegistry, Plugin, Registration};
