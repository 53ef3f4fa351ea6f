//! Persisted records for the slotswap state store.
//!
//! All types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

use slotswap_core::{Endpoint, Environment, Role, Slot, TrafficState};

/// Runtime metadata for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotState {
    pub endpoint: Endpoint,
    pub version: Option<String>,
    pub container_group_id: Option<String>,
}

impl SlotState {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            version: None,
            container_group_id: None,
        }
    }
}

/// The environment markers for one application.
///
/// Exactly one slot is active; the other is inactive by construction,
/// since only `active` is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub app: String,
    pub active: Slot,
    pub traffic: TrafficState,
    pub blue: SlotState,
    pub green: SlotState,
    /// Unix timestamp (seconds) of the last mutation.
    pub updated_at: u64,
}

impl EnvironmentRecord {
    /// A fresh record with all traffic on `active`.
    pub fn new(app: &str, active: Slot, blue: Endpoint, green: Endpoint, now: u64) -> Self {
        Self {
            app: app.to_string(),
            active,
            traffic: TrafficState::all_on(active),
            blue: SlotState::new(blue),
            green: SlotState::new(green),
            updated_at: now,
        }
    }

    pub fn inactive(&self) -> Slot {
        self.active.other()
    }

    pub fn role(&self, slot: Slot) -> Role {
        if slot == self.active {
            Role::Active
        } else {
            Role::Inactive
        }
    }

    pub fn slot(&self, slot: Slot) -> &SlotState {
        match slot {
            Slot::Blue => &self.blue,
            Slot::Green => &self.green,
        }
    }

    pub fn slot_mut(&mut self, slot: Slot) -> &mut SlotState {
        match slot {
            Slot::Blue => &mut self.blue,
            Slot::Green => &mut self.green,
        }
    }

    /// Both slots as domain environments.
    pub fn environment(&self, slot: Slot) -> Environment {
        let state = self.slot(slot);
        Environment {
            name: slot,
            role: self.role(slot),
            endpoint: state.endpoint.clone(),
            container_group_id: state.container_group_id.clone(),
            version: state.version.clone(),
        }
    }

    pub fn environments(&self) -> [Environment; 2] {
        [self.environment(Slot::Blue), self.environment(Slot::Green)]
    }
}
