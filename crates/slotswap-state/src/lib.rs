//! slotswap-state — durable state owned by the deployment core.
//!
//! Two things live here:
//!
//! - The **environment store**, backed by [redb](https://docs.rs/redb):
//!   which slot is active, the current traffic weights, per-slot runtime
//!   metadata, and a history of finished deployments. Every mutation is a
//!   single write transaction, so read-modify-write operations such as
//!   [`StateStore::flip_active`] are atomic.
//! - The **deployment lock**, a lock file per application created with
//!   `O_EXCL` semantics and removed when its [`LockGuard`] drops.
//!
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod lock;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{LockError, StateError, StateResult};
pub use lock::{LockGuard, LockInfo, LockManager};
pub use store::{FlipOutcome, StateStore, epoch_secs};
pub use types::*;
