//! slotswap-proxy — moves traffic between the two slots.
//!
//! # Components
//!
//! - **`render`** — typed [`ProxyConfig`] rendered into an upstream block
//!   with per-slot weights; identical inputs give identical output
//! - **`reload`** — [`ProxyReloader`] collaborator trait and a file +
//!   command implementation (write atomically, then ask the proxy to
//!   reload rather than restart)
//! - **`shift`** — [`TrafficShifter`] applies a [`Schedule`] step by step,
//!   consulting a [`StepObserver`] after each one

pub mod error;
pub mod reload;
pub mod render;
pub mod shift;

pub use error::{ProxyError, ProxyResult};
pub use reload::{FileReloader, ProxyReloader};
pub use render::{NginxRenderer, ProxyConfig, ProxyRenderer, RenderedConfig, Upstream};
pub use shift::{
    NoopObserver, Schedule, ShiftAbort, ShiftOutcome, ShiftTarget, StepObserver, StepVerdict,
    TrafficShifter,
};
