//! In-memory collaborators and a harness for controller tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use slotswap_core::{Endpoint, ResolvedOptions, Slot, TrafficState};
use slotswap_deploy::{
    CleanupController, ContainerRuntime, CutoverController, DeployContext, DeployPipeline,
    DeploySettings, RollbackController, RuntimeError,
};
use slotswap_health::{HealthPolicy, HealthProber, Probe, ProbeResult};
use slotswap_hooks::{HookContext, HookDispatcher, HookName, HookRegistry};
use slotswap_proxy::{ProxyReloader, ProxyResult, RenderedConfig, Schedule, TrafficShifter};
use slotswap_state::{EnvironmentRecord, LockManager, StateStore};

pub const APP: &str = "shop";

// ── Container runtime ──────────────────────────────────────────────

#[derive(Default)]
pub struct FakeRuntime {
    calls: Mutex<Vec<String>>,
    fail_start: AtomicBool,
    down: Mutex<Vec<Slot>>,
    /// Raised right after a successful start.
    stop_on_start: Mutex<Option<Arc<watch::Sender<bool>>>>,
}

impl FakeRuntime {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    /// Report `slot` as not running until it is started again.
    pub fn mark_down(&self, slot: Slot) {
        self.down.lock().unwrap().push(slot);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn start_environment(
        &self,
        app: &str,
        slot: Slot,
        version: &str,
        _endpoint: &Endpoint,
    ) -> Result<String, RuntimeError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(RuntimeError::Command("compose up exited with 1".to_string()));
        }
        self.calls.lock().unwrap().push(format!("start {slot} {version}"));
        self.down.lock().unwrap().retain(|s| *s != slot);
        if let Some(stop) = self.stop_on_start.lock().unwrap().as_ref() {
            let _ = stop.send(true);
        }
        Ok(format!("{app}-{slot}-{version}"))
    }

    async fn stop_environment(&self, _app: &str, slot: Slot) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(format!("stop {slot}"));
        self.down.lock().unwrap().push(slot);
        Ok(())
    }

    async fn is_running(&self, _app: &str, slot: Slot) -> Result<bool, RuntimeError> {
        Ok(!self.down.lock().unwrap().contains(&slot))
    }
}

// ── Proxy ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingReloader {
    applied: Mutex<Vec<TrafficState>>,
}

impl RecordingReloader {
    pub fn applied(&self) -> Vec<TrafficState> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProxyReloader for RecordingReloader {
    async fn reload(&self, config: &RenderedConfig) -> ProxyResult<()> {
        self.applied.lock().unwrap().push(config.traffic);
        Ok(())
    }
}

// ── Health ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Script {
    Always(bool),
    /// Healthy for this many more checks, then unhealthy.
    HealthyFor(u32),
}

/// Answers per slot, keyed by endpoint port. Unscripted slots are healthy.
#[derive(Default)]
pub struct SlotProbe {
    scripts: Mutex<HashMap<u16, Script>>,
    calls: Mutex<HashMap<u16, u32>>,
}

impl SlotProbe {
    pub fn set_healthy(&self, slot: Slot, healthy: bool) {
        self.scripts
            .lock()
            .unwrap()
            .insert(port(slot), Script::Always(healthy));
    }

    pub fn healthy_for(&self, slot: Slot, checks: u32) {
        self.scripts
            .lock()
            .unwrap()
            .insert(port(slot), Script::HealthyFor(checks));
    }

    pub fn calls(&self, slot: Slot) -> u32 {
        self.calls.lock().unwrap().get(&port(slot)).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Probe for SlotProbe {
    async fn check(&self, endpoint: &Endpoint, _: &str, _: Duration) -> ProbeResult {
        *self.calls.lock().unwrap().entry(endpoint.port).or_default() += 1;
        let mut scripts = self.scripts.lock().unwrap();
        let healthy = match scripts.get_mut(&endpoint.port) {
            None => true,
            Some(Script::Always(h)) => *h,
            Some(Script::HealthyFor(n)) if *n > 0 => {
                *n -= 1;
                true
            }
            Some(Script::HealthyFor(_)) => false,
        };
        if healthy {
            ProbeResult::Healthy
        } else {
            ProbeResult::Unhealthy
        }
    }
}

pub fn port(slot: Slot) -> u16 {
    match slot {
        Slot::Blue => 8081,
        Slot::Green => 8082,
    }
}

// ── Harness ────────────────────────────────────────────────────────

pub type HookLog = Arc<Mutex<Vec<HookName>>>;

pub struct Setup {
    pub schedule: Vec<(u16, u16)>,
    pub options: Vec<(&'static str, &'static str)>,
    pub failing_hooks: Vec<HookName>,
    pub verify_each_step: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            schedule: vec![(0, 100)],
            options: Vec::new(),
            failing_hooks: Vec::new(),
            verify_each_step: true,
        }
    }
}

pub struct Harness {
    pub ctx: DeployContext,
    pub runtime: Arc<FakeRuntime>,
    pub reloader: Arc<RecordingReloader>,
    pub probe: Arc<SlotProbe>,
    pub hooks: HookLog,
    pub stop: Arc<watch::Sender<bool>>,
    _dir: tempfile::TempDir,
}

impl Setup {
    pub fn build(self) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open_in_memory().unwrap();
        let locks = LockManager::new(dir.path().join("locks"), Duration::from_secs(3600));

        let runtime = Arc::new(FakeRuntime::default());
        let reloader = Arc::new(RecordingReloader::default());
        let probe = Arc::new(SlotProbe::default());

        let prober = HealthProber::new(
            probe.clone(),
            HealthPolicy {
                path: "/health".to_string(),
                max_attempts: 3,
                interval: Duration::from_secs(1),
                connect_timeout: Duration::from_secs(1),
            },
        );
        let shifter = TrafficShifter::new(reloader.clone(), Duration::ZERO);

        let hooks = HookLog::default();
        let mut registry = HookRegistry::new();
        for hook in HookName::ALL {
            let log = Arc::clone(&hooks);
            let fail = self.failing_hooks.contains(&hook);
            registry.register_fn(hook, "recorder", move |ctx: &HookContext| {
                log.lock().unwrap().push(ctx.hook());
                if fail {
                    anyhow::bail!("{} refused", ctx.hook());
                }
                Ok(())
            });
        }
        let dispatcher = HookDispatcher::new(
            Arc::new(registry),
            Arc::new(ResolvedOptions::from_pairs(self.options)),
            Duration::from_secs(5),
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let settings = DeploySettings {
            app: APP.to_string(),
            blue: Endpoint::new("127.0.0.1", port(Slot::Blue)),
            green: Endpoint::new("127.0.0.1", port(Slot::Green)),
            schedule: Schedule::from(self.schedule),
            verify_each_step: self.verify_each_step,
            lock_timeout: Duration::ZERO,
            runtime_timeout: Duration::from_secs(10),
        };

        let ctx = DeployContext {
            settings,
            store,
            locks,
            runtime: runtime.clone(),
            prober,
            shifter,
            hooks: dispatcher,
            stop: stop_rx,
        };

        Harness {
            ctx,
            runtime,
            reloader,
            probe,
            hooks,
            stop: Arc::new(stop_tx),
            _dir: dir,
        }
    }
}

impl Harness {
    pub fn pipeline(&self) -> DeployPipeline {
        DeployPipeline::new(self.ctx.clone())
    }

    pub fn rollback(&self) -> RollbackController {
        RollbackController::new(self.ctx.clone())
    }

    pub fn cutover(&self) -> CutoverController {
        CutoverController::new(self.ctx.clone())
    }

    pub fn cleanup(&self) -> CleanupController {
        CleanupController::new(self.ctx.clone())
    }

    /// Create the markers without deploying (blue active).
    pub fn init(&self) -> EnvironmentRecord {
        self.ctx
            .store
            .ensure_environments(APP, self.ctx.settings.blue.clone(), self.ctx.settings.green.clone())
            .unwrap()
    }

    pub fn record(&self) -> EnvironmentRecord {
        self.ctx.store.get_environments(APP).unwrap().unwrap()
    }

    pub fn lock_held(&self) -> bool {
        self.ctx.locks.holder(APP).unwrap().is_some()
    }

    pub fn hook_count(&self, hook: HookName) -> usize {
        self.hooks.lock().unwrap().iter().filter(|h| **h == hook).count()
    }

    pub fn stop_on_start(&self) {
        *self.runtime.stop_on_start.lock().unwrap() = Some(Arc::clone(&self.stop));
    }

    /// Invariants that must hold after every terminal phase.
    pub fn assert_consistent(&self) {
        let record = self.record();
        assert_eq!(
            u16::from(record.traffic.blue()) + u16::from(record.traffic.green()),
            100
        );
        assert_ne!(record.active, record.inactive());
        assert!(!self.lock_held(), "lock left behind");
    }
}

pub fn ts(blue: u16, green: u16) -> TrafficState {
    TrafficState::new(blue, green).unwrap()
}
