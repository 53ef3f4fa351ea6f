//! Hook handlers, plugins, and the registry they populate.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use slotswap_core::{ConfigResult, OptionsTable};

use crate::event::HookContext;
use crate::name::HookName;

/// One hook implementation.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn call(&self, ctx: &HookContext) -> anyhow::Result<()>;
}

/// Adapts a synchronous closure into a [`HookHandler`].
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> HookHandler for FnHook<F>
where
    F: Fn(&HookContext) -> anyhow::Result<()> + Send + Sync,
{
    async fn call(&self, ctx: &HookContext) -> anyhow::Result<()> {
        (self.0)(ctx)
    }
}

/// An independently authored extension.
pub trait Plugin: Send + Sync {
    /// Stable identifier, used in logs and failure reports.
    fn id(&self) -> &str;

    /// Declare options with their defaults. Called before any plugin
    /// registers hooks.
    fn declare(&self, _options: &mut OptionsTable) -> ConfigResult<()> {
        Ok(())
    }

    /// Register hook handlers.
    fn register(self: Arc<Self>, registry: &mut HookRegistry);
}

/// A handler registered under a hook name.
#[derive(Clone)]
pub struct Registration {
    pub plugin_id: String,
    pub handler: Arc<dyn HookHandler>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("plugin_id", &self.plugin_id)
            .finish_non_exhaustive()
    }
}

/// Ordered handlers per hook name.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<HookName, Vec<Registration>>,
    plugins: Vec<String>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare every plugin's options, then register their hooks, in the
    /// order given.
    pub fn load(plugins: &[Arc<dyn Plugin>], options: &mut OptionsTable) -> ConfigResult<Self> {
        for plugin in plugins {
            plugin.declare(options)?;
        }
        let mut registry = Self::new();
        for plugin in plugins {
            registry.plugins.push(plugin.id().to_string());
            Arc::clone(plugin).register(&mut registry);
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        hook: HookName,
        plugin_id: impl Into<String>,
        handler: Arc<dyn HookHandler>,
    ) {
        let plugin_id = plugin_id.into();
        debug!(%hook, plugin = %plugin_id, "hook registered");
        self.hooks.entry(hook).or_default().push(Registration { plugin_id, handler });
    }

    pub fn register_fn<F>(&mut self, hook: HookName, plugin_id: impl Into<String>, f: F)
    where
        F: Fn(&HookContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(hook, plugin_id, Arc::new(FnHook(f)));
    }

    /// Handlers for `hook` in registration order. Empty if none.
    pub fn handlers(&self, hook: HookName) -> &[Registration] {
        self.hooks.get(&hook).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids of plugins loaded through [`HookRegistry::load`].
    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    pub fn len(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
