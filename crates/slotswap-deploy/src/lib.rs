//! slotswap-deploy — the deployment controllers.
//!
//! # Components
//!
//! - **`context`** — [`DeployContext`]: settings plus every collaborator a
//!   run needs (store, lock, runtime, prober, shifter, hooks, stop signal)
//! - **`pipeline`** — [`DeployPipeline`]: `INIT → PRE_DEPLOY → ENV_STARTING
//!   → HEALTH_GATE → TRAFFIC_SHIFT → CUTOVER → POST_DEPLOY → CLEANUP → DONE`
//! - **`rollback`** — [`RollbackController`]: health-gate the inactive slot,
//!   shift to it in one step, flip
//! - **`manual`** — operator cutover with explicit weights, and explicit
//!   cleanup of the inactive slot
//! - **`runtime`** — [`ContainerRuntime`] collaborator trait
//!
//! Every controller holds the application's lock for its whole run; the
//! guard is scoped, so it is released on every exit path.

pub mod context;
pub mod error;
pub mod manual;
pub mod pipeline;
pub mod rollback;
mod run;
pub mod runtime;

pub use context::{DeployContext, DeploySettings};
pub use error::{DeployError, DeployFailure, DeployResult, ErrorKind, RuntimeError};
pub use manual::{CleanupController, CutoverController, CutoverRequest};
pub use pipeline::DeployPipeline;
pub use rollback::RollbackController;
pub use runtime::ContainerRuntime;
