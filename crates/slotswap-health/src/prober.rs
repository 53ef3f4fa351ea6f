//! Bounded health gate.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use slotswap_core::config::HealthConfig;
use slotswap_core::{ConfigResult, Endpoint, Slot};

use crate::checker::{HttpProbe, Probe, ProbeResult};

/// How a slot is polled before a verdict is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthPolicy {
    pub path: String,
    pub max_attempts: u32,
    pub interval: Duration,
    pub connect_timeout: Duration,
}

impl HealthPolicy {
    pub fn from_config(config: &HealthConfig) -> ConfigResult<Self> {
        Ok(Self {
            path: config.path.clone(),
            max_attempts: config.max_attempts.max(1),
            interval: config.interval()?,
            connect_timeout: config.connect_timeout()?,
        })
    }

    /// Worst-case time one gate can take.
    pub fn upper_bound(&self) -> Duration {
        (self.interval + self.connect_timeout) * self.max_attempts
    }
}

/// Gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    Unhealthy,
}

/// What a gate run observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub slot: Slot,
    pub verdict: HealthVerdict,
    /// Probes actually sent.
    pub attempts: u32,
    pub last_result: ProbeResult,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.verdict == HealthVerdict::Healthy
    }
}

/// Polls a slot's health endpoint until it is healthy or attempts run out.
#[derive(Clone)]
pub struct HealthProber {
    probe: Arc<dyn Probe>,
    policy: HealthPolicy,
}

impl HealthProber {
    pub fn new(probe: Arc<dyn Probe>, policy: HealthPolicy) -> Self {
        Self { probe, policy }
    }

    /// A prober using real HTTP requests.
    pub fn http(policy: HealthPolicy) -> Self {
        Self::new(Arc::new(HttpProbe), policy)
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Run the gate with the configured policy.
    pub async fn probe(&self, slot: Slot, endpoint: &Endpoint) -> HealthReport {
        self.probe_with(slot, endpoint, &self.policy).await
    }

    /// Run the gate with an explicit policy.
    ///
    /// Stops at the first 2xx. Otherwise sends exactly `max_attempts`
    /// probes, sleeping `interval` between them (not after the last).
    pub async fn probe_with(
        &self,
        slot: Slot,
        endpoint: &Endpoint,
        policy: &HealthPolicy,
    ) -> HealthReport {
        let max_attempts = policy.max_attempts.max(1);
        let mut last_result = ProbeResult::Failed;

        info!(
            %slot,
            address = %endpoint.address(),
            path = %policy.path,
            max_attempts,
            "health gate started"
        );

        for attempt in 1..=max_attempts {
            // The probe should honour the timeout itself; this bounds
            // implementations that don't.
            last_result = tokio::time::timeout(
                policy.connect_timeout,
                self.probe.check(endpoint, &policy.path, policy.connect_timeout),
            )
            .await
            .unwrap_or(ProbeResult::Failed);

            if last_result.is_healthy() {
                info!(%slot, attempt, "health gate passed");
                return HealthReport {
                    slot,
                    verdict: HealthVerdict::Healthy,
                    attempts: attempt,
                    last_result,
                };
            }

            debug!(%slot, attempt, max_attempts, result = ?last_result, "health probe failed");
            if attempt < max_attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        warn!(%slot, attempts = max_attempts, result = ?last_result, "health gate exhausted");
        HealthReport {
            slot,
            verdict: HealthVerdict::Unhealthy,
            attempts: max_attempts,
            last_result,
        }
    }
}
