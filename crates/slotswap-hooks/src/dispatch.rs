//! Broadcasting events to registered handlers.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use slotswap_core::ResolvedOptions;

use crate::error::HookError;
use crate::event::{HookContext, HookEvent};
use crate::name::HookName;
use crate::registry::HookRegistry;

/// A handler that failed or timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure {
    pub hook: HookName,
    pub plugin: String,
    pub message: String,
}

impl std::fmt::Display for HookFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.hook, self.plugin, self.message)
    }
}

/// What one broadcast did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub hook: HookName,
    pub invoked: usize,
    /// Failures of observational handlers. Always empty for gating hooks,
    /// whose failures are returned as errors instead.
    pub failures: Vec<HookFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Invokes handlers for one application run.
#[derive(Clone)]
pub struct HookDispatcher {
    registry: Arc<HookRegistry>,
    options: Arc<ResolvedOptions>,
    timeout: Duration,
}

impl HookDispatcher {
    pub fn new(registry: Arc<HookRegistry>, options: Arc<ResolvedOptions>, timeout: Duration) -> Self {
        Self {
            registry,
            options,
            timeout,
        }
    }

    pub fn options(&self) -> &Arc<ResolvedOptions> {
        &self.options
    }

    /// Run every handler registered for `event`'s hook, in registration order.
    ///
    /// A gating hook returns the first failure and skips the remaining
    /// handlers. Observational hooks always run every handler.
    pub async fn dispatch(
        &self,
        app: &str,
        deployment_id: &str,
        event: HookEvent,
    ) -> Result<DispatchReport, HookError> {
        let hook = event.name();
        let handlers = self.registry.handlers(hook);
        let mut report = DispatchReport {
            hook,
            invoked: 0,
            failures: Vec::new(),
        };
        if handlers.is_empty() {
            debug!(%hook, "no handlers registered");
            return Ok(report);
        }

        let ctx = HookContext {
            app: app.to_string(),
            deployment_id: deployment_id.to_string(),
            event,
            options: Arc::clone(&self.options),
        };

        for registration in handlers {
            debug!(%hook, plugin = %registration.plugin_id, "invoking hook");
            report.invoked += 1;

            let result = match tokio::time::timeout(self.timeout, registration.handler.call(&ctx)).await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(_) => format!("timed out after {:?}", self.timeout),
            };

            if hook.is_gating() {
                warn!(%hook, plugin = %registration.plugin_id, error = %result, "gating hook failed");
                return Err(HookError::Failed {
                    hook,
                    plugin: registration.plugin_id.clone(),
                    message: result,
                });
            }

            warn!(%hook, plugin = %registration.plugin_id, error = %result, "hook failed, continuing");
            report.failures.push(HookFailure {
                hook,
                plugin: registration.plugin_id.clone(),
                message: result,
            });
        }

        Ok(report)
    }
}
