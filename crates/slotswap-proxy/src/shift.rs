//! Stepwise traffic shifting.
//!
//! A [`Schedule`] is a list of `(from, to)` percentage pairs. The whole
//! schedule is validated before the first step is applied; after each
//! applied step the caller's [`StepObserver`] decides whether to go on.
//! An abort re-applies the last step the observer accepted (or the
//! starting state), so the proxy never stays on a rejected weighting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use slotswap_core::{Endpoint, Slot, TrafficState, WeightPair};

use crate::error::{ProxyError, ProxyResult};
use crate::reload::ProxyReloader;
use crate::render::{NginxRenderer, ProxyConfig, ProxyRenderer, RenderedConfig};

/// Ordered traffic weight steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule {
    steps: Vec<WeightPair>,
}

impl Schedule {
    pub fn new(steps: Vec<WeightPair>) -> Self {
        Self { steps }
    }

    /// One step straight to 100% on the target.
    pub fn atomic() -> Self {
        Self::new(vec![WeightPair::new(0, 100)])
    }

    pub fn steps(&self) -> &[WeightPair] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every step must be a valid pair. Reports the first bad index.
    pub fn validate(&self) -> ProxyResult<()> {
        if self.steps.is_empty() {
            return Err(ProxyError::EmptySchedule);
        }
        for (index, step) in self.steps.iter().enumerate() {
            step.validate()
                .map_err(|source| ProxyError::InvalidSchedule { index, source })?;
        }
        Ok(())
    }

    /// Whether the last step puts all traffic on the target.
    pub fn completes(&self) -> bool {
        self.steps.last().is_some_and(|s| s.to == 100)
    }

    fn states(&self, from: Slot, to: Slot) -> ProxyResult<Vec<TrafficState>> {
        self.validate()?;
        self.steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                step.to_state(from, to)
                    .map_err(|source| ProxyError::InvalidSchedule { index, source })
            })
            .collect()
    }
}

impl From<Vec<(u16, u16)>> for Schedule {
    fn from(pairs: Vec<(u16, u16)>) -> Self {
        Self::new(pairs.into_iter().map(WeightPair::from).collect())
    }
}

/// Observer decision after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepVerdict {
    Continue,
    Abort(String),
}

/// Called after each applied step, before the next one.
#[async_trait]
pub trait StepObserver: Send {
    async fn on_step(&mut self, index: usize, traffic: TrafficState) -> StepVerdict;
}

/// Accepts every step.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl StepObserver for NoopObserver {
    async fn on_step(&mut self, _: usize, _: TrafficState) -> StepVerdict {
        StepVerdict::Continue
    }
}

/// The application and endpoints a shift applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftTarget {
    pub app: String,
    pub health_path: String,
    pub blue: Endpoint,
    pub green: Endpoint,
}

impl ShiftTarget {
    fn config(&self, traffic: TrafficState) -> ProxyResult<ProxyConfig> {
        ProxyConfig::new(&self.app, &self.health_path, &self.blue, &self.green, traffic)
    }
}

/// Why and where a shift stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftAbort {
    pub step: usize,
    pub rejected: TrafficState,
    pub reason: String,
}

/// Result of running a schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftOutcome {
    /// What the proxy is serving now.
    pub final_state: TrafficState,
    /// Every state applied, in order (including a revert).
    pub applied: Vec<TrafficState>,
    pub aborted: Option<ShiftAbort>,
}

impl ShiftOutcome {
    pub fn completed(&self) -> bool {
        self.aborted.is_none()
    }
}

/// Applies traffic weights through a renderer and a reloader.
#[derive(Clone)]
pub struct TrafficShifter {
    renderer: Arc<dyn ProxyRenderer>,
    reloader: Arc<dyn ProxyReloader>,
    observation_window: Duration,
}

impl TrafficShifter {
    pub fn new(reloader: Arc<dyn ProxyReloader>, observation_window: Duration) -> Self {
        Self {
            renderer: Arc::new(NginxRenderer),
            reloader,
            observation_window,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ProxyRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Render and reload one traffic state.
    pub async fn apply(
        &self,
        target: &ShiftTarget,
        traffic: TrafficState,
    ) -> ProxyResult<RenderedConfig> {
        let config = target.config(traffic)?;
        let rendered = self.renderer.render(&config);
        self.reloader.reload(&rendered).await?;
        info!(app = %target.app, %traffic, "traffic applied");
        Ok(rendered)
    }

    /// Run `schedule`, moving traffic from `from` towards `to`.
    ///
    /// Nothing is applied if any step is invalid. The observation window
    /// is waited between steps, never after the last one.
    pub async fn shift(
        &self,
        target: &ShiftTarget,
        from: Slot,
        to: Slot,
        schedule: &Schedule,
        current: TrafficState,
        observer: &mut dyn StepObserver,
    ) -> ProxyResult<ShiftOutcome> {
        if from == to {
            return Err(ProxyError::SameSlot(from));
        }
        let states = schedule.states(from, to)?;
        // Reject bad endpoints before touching the proxy.
        target.config(current)?;

        let mut applied = Vec::with_capacity(states.len());
        let mut last_good = current;
        let last = states.len() - 1;

        info!(app = %target.app, %from, %to, steps = states.len(), "traffic shift started");

        for (index, traffic) in states.into_iter().enumerate() {
            self.apply(target, traffic).await?;
            applied.push(traffic);

            if index < last && !self.observation_window.is_zero() {
                tokio::time::sleep(self.observation_window).await;
            }

            match observer.on_step(index, traffic).await {
                StepVerdict::Continue => last_good = traffic,
                StepVerdict::Abort(reason) => {
                    warn!(app = %target.app, step = index, %traffic, %reason, revert_to = %last_good, "traffic shift aborted");
                    self.apply(target, last_good).await?;
                    applied.push(last_good);
                    return Ok(ShiftOutcome {
                        final_state: last_good,
                        applied,
                        aborted: Some(ShiftAbort {
                            step: index,
                            rejected: traffic,
                            reason,
                        }),
                    });
                }
            }
        }

        info!(app = %target.app, traffic = %last_good, "traffic shift complete");
        Ok(ShiftOutcome {
            final_state: last_good,
            applied,
            aborted: None,
        })
    }
}
