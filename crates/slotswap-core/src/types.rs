//! Domain types for slotswap.
//!
//! These types describe the two deployment slots, their traffic weights,
//! and the phases a deployment moves through. All of them serialize to
//! JSON for the state store and the audit trail.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, WeightError};

// ── Slots ──────────────────────────────────────────────────────────

/// One of the two parallel deployment slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Blue,
    Green,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Blue, Slot::Green];

    /// The opposite slot.
    pub fn other(self) -> Slot {
        match self {
            Slot::Blue => Slot::Green,
            Slot::Green => Slot::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Blue => "blue",
            Slot::Green => "green",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blue" => Ok(Slot::Blue),
            "green" => Ok(Slot::Green),
            _ => Err(ConfigError::UnknownSlot(s.to_string())),
        }
    }
}

/// Whether a slot currently receives production traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Active,
    Inactive,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Active => "active",
            Role::Inactive => "inactive",
        })
    }
}

/// Network location of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` form used for TCP connects and proxy upstreams.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A slot together with its role and runtime metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: Slot,
    pub role: Role,
    pub endpoint: Endpoint,
    /// Identifier handed back by the container runtime, if running.
    pub container_group_id: Option<String>,
    /// Version last started in this slot.
    pub version: Option<String>,
}

// ── Traffic ────────────────────────────────────────────────────────

/// Proxy weight distribution between the two slots.
///
/// Both weights are whole percentages and always sum to 100; the only
/// way to build one is through [`TrafficState::new`] or
/// [`TrafficState::all_on`], and deserialization runs the same check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTraffic")]
pub struct TrafficState {
    blue: u8,
    green: u8,
}

#[derive(Deserialize)]
struct RawTraffic {
    blue: u16,
    green: u16,
}

impl TryFrom<RawTraffic> for TrafficState {
    type Error = WeightError;

    fn try_from(raw: RawTraffic) -> Result<Self, Self::Error> {
        TrafficState::new(raw.blue, raw.green)
    }
}

impl TrafficState {
    pub fn new(blue: u16, green: u16) -> Result<Self, WeightError> {
        check_pair(blue, green)?;
        Ok(Self {
            blue: blue as u8,
            green: green as u8,
        })
    }

    /// Everything on one slot.
    pub fn all_on(slot: Slot) -> Self {
        match slot {
            Slot::Blue => Self { blue: 100, green: 0 },
            Slot::Green => Self { blue: 0, green: 100 },
        }
    }

    pub fn blue(&self) -> u8 {
        self.blue
    }

    pub fn green(&self) -> u8 {
        self.green
    }

    pub fn weight(&self, slot: Slot) -> u8 {
        match slot {
            Slot::Blue => self.blue,
            Slot::Green => self.green,
        }
    }

    pub fn is_all_on(&self, slot: Slot) -> bool {
        self.weight(slot) == 100
    }
}

impl fmt::Display for TrafficState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blue={} green={}", self.blue, self.green)
    }
}

/// One step of a traffic schedule: `(from, to)` percentages, where
/// `from` is the currently active slot and `to` the target.
///
/// Pairs are validated when a schedule is checked, not when parsed, so
/// a bad entry is reported with its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u16, u16)", into = "(u16, u16)")]
pub struct WeightPair {
    pub from: u16,
    pub to: u16,
}

impl WeightPair {
    pub fn new(from: u16, to: u16) -> Self {
        Self { from, to }
    }

    pub fn validate(&self) -> Result<(), WeightError> {
        check_pair(self.from, self.to)
    }

    /// Map the pair onto concrete slots.
    pub fn to_state(&self, from: Slot, to: Slot) -> Result<TrafficState, WeightError> {
        self.validate()?;
        if from == to {
            return Ok(TrafficState::all_on(to));
        }
        match to {
            Slot::Blue => TrafficState::new(self.to, self.from),
            Slot::Green => TrafficState::new(self.from, self.to),
        }
    }
}

impl From<(u16, u16)> for WeightPair {
    fn from((from, to): (u16, u16)) -> Self {
        Self { from, to }
    }
}

impl From<WeightPair> for (u16, u16) {
    fn from(pair: WeightPair) -> Self {
        (pair.from, pair.to)
    }
}

fn check_pair(a: u16, b: u16) -> Result<(), WeightError> {
    if a > 100 {
        return Err(WeightError::OutOfRange(a));
    }
    if b > 100 {
        return Err(WeightError::OutOfRange(b));
    }
    if a + b != 100 {
        return Err(WeightError::BadSum(a, b));
    }
    Ok(())
}

// ── Deployments ────────────────────────────────────────────────────

/// Which controller produced a deployment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Deploy,
    Rollback,
    Cutover,
    Cleanup,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Deploy => "deploy",
            Operation::Rollback => "rollback",
            Operation::Cutover => "cutover",
            Operation::Cleanup => "cleanup",
        };
        f.write_str(s)
    }
}

/// Phase of a deployment or rollback state machine.
///
/// Deploy: `Init → PreDeploy → EnvStarting → HealthGate → TrafficShift →
/// Cutover → PostDeploy → Cleanup → Done`.
/// Rollback: `Init → HealthGate → Cutover → PostRollback → Cleanup → Done`.
/// Either may end in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    PreDeploy,
    EnvStarting,
    HealthGate,
    TrafficShift,
    Cutover,
    PostDeploy,
    PostRollback,
    Cleanup,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Init => "INIT",
            Phase::PreDeploy => "PRE_DEPLOY",
            Phase::EnvStarting => "ENV_STARTING",
            Phase::HealthGate => "HEALTH_GATE",
            Phase::TrafficShift => "TRAFFIC_SHIFT",
            Phase::Cutover => "CUTOVER",
            Phase::PostDeploy => "POST_DEPLOY",
            Phase::PostRollback => "POST_ROLLBACK",
            Phase::Cleanup => "CLEANUP",
            Phase::Done => "DONE",
            Phase::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
    RolledBack,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
            Outcome::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// A non-fatal problem recorded against a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// Where it came from, e.g. `hook:post_deploy:notify` or `health_gate`.
    pub source: String,
    pub message: String,
}

/// Why a deployment failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Error taxonomy name, e.g. `HealthCheckFailed`.
    pub kind: String,
    pub message: String,
}

/// One execution of the deploy, rollback, cutover or cleanup sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub app: String,
    pub operation: Operation,
    /// Opaque version identifier (build tag). Absent for rollback/cutover.
    pub version: Option<String>,
    /// Slot being brought into service.
    pub target: Slot,
    pub phase: Phase,
    /// Every phase entered, in order.
    pub phases: Vec<Phase>,
    /// Last non-terminal phase reached before `Failed`.
    pub failed_in: Option<Phase>,
    pub outcome: Option<Outcome>,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub warnings: Vec<Warning>,
    pub failure: Option<FailureRecord>,
}

impl Deployment {
    pub fn new(
        id: impl Into<String>,
        app: impl Into<String>,
        operation: Operation,
        version: Option<String>,
        target: Slot,
        started_at: u64,
    ) -> Self {
        Self {
            id: id.into(),
            app: app.into(),
            operation,
            version,
            target,
            phase: Phase::Init,
            phases: vec![Phase::Init],
            failed_in: None,
            outcome: None,
            started_at,
            finished_at: None,
            warnings: Vec::new(),
            failure: None,
        }
    }

    /// Move to `phase`. Entering a phase after a terminal one is ignored.
    pub fn enter(&mut self, phase: Phase) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = phase;
        self.phases.push(phase);
    }

    pub fn has_entered(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }

    pub fn warn(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(Warning {
            source: source.into(),
            message: message.into(),
        });
    }

    /// Terminal failure. Records the phase that was running.
    pub fn fail(&mut self, kind: impl Into<String>, message: impl Into<String>, now: u64) {
        if self.phase.is_terminal() {
            return;
        }
        self.failed_in = Some(self.phase);
        self.failure = Some(FailureRecord {
            kind: kind.into(),
            message: message.into(),
        });
        self.enter(Phase::Failed);
        self.outcome = Some(Outcome::Failed);
        self.finished_at = Some(now);
    }

    /// Terminal success with the given outcome.
    pub fn finish(&mut self, outcome: Outcome, now: u64) {
        if self.phase.is_terminal() {
            return;
        }
        self.enter(Phase::Done);
        self.outcome = Some(outcome);
        self.finished_at = Some(now);
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Some(Outcome::Success | Outcome::RolledBack))
    }
}
