//! Container runtime collaborator.

use async_trait::async_trait;

use slotswap_core::{Endpoint, Slot};

use crate::error::RuntimeError;

/// Starts, stops and inspects the containers behind one slot.
///
/// The controllers never look at runtime-specific metadata; the id
/// returned by [`start_environment`](Self::start_environment) is only
/// stored and shown.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Bring `slot` up at `version`, serving on `endpoint`. Returns the
    /// container group id.
    async fn start_environment(
        &self,
        app: &str,
        slot: Slot,
        version: &str,
        endpoint: &Endpoint,
    ) -> Result<String, RuntimeError>;

    async fn stop_environment(&self, app: &str, slot: Slot) -> Result<(), RuntimeError>;

    async fn is_running(&self, app: &str, slot: Slot) -> Result<bool, RuntimeError>;
}
