//! StateStore — redb-backed environment store for slotswap.
//!
//! Holds one [`EnvironmentRecord`] per application plus the history of
//! finished deployments. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).
//!
//! Every read-modify-write runs inside a single redb write transaction.
//! redb serializes write transactions, so two callers racing to flip the
//! active slot cannot both observe the old value.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, info};

use slotswap_core::{Deployment, Endpoint, Slot, TrafficState};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Result of [`StateStore::flip_active`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipOutcome {
    /// The active slot changed.
    Flipped { from: Slot, to: Slot },
    /// The requested slot was already active; nothing was written.
    Unchanged,
}

/// Thread-safe state store backed by redb.
#[derive(Debug, Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    ///
    /// redb takes an exclusive file lock; a second process opening the
    /// same file gets [`StateError::Busy`].
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(|e| match e {
            redb::DatabaseError::DatabaseAlreadyOpen => StateError::Busy(path.to_path_buf()),
            other => StateError::Open(other.to_string()),
        })?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Environments ───────────────────────────────────────────────

    /// Get the environment record for an application.
    pub fn get_environments(&self, app: &str) -> StateResult<Option<EnvironmentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
        match table.get(app).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: EnvironmentRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Load the record for `app`, creating it on first use.
    ///
    /// A new application starts with blue active and all traffic on blue.
    /// Endpoints of an existing record are refreshed from the arguments
    /// so configuration changes take effect; roles are never touched.
    pub fn ensure_environments(
        &self,
        app: &str,
        blue: Endpoint,
        green: Endpoint,
    ) -> StateResult<EnvironmentRecord> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
            let existing = table
                .get(app)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());

            let (record, changed) = match existing {
                Some(bytes) => {
                    let mut record: EnvironmentRecord =
                        serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                    let changed = record.blue.endpoint != blue || record.green.endpoint != green;
                    if changed {
                        record.blue.endpoint = blue;
                        record.green.endpoint = green;
                        record.updated_at = now;
                    }
                    (record, changed)
                }
                None => {
                    info!(%app, "initializing environment markers (blue active)");
                    (EnvironmentRecord::new(app, Slot::Blue, blue, green, now), true)
                }
            };

            if changed {
                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                table
                    .insert(app, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    /// Atomically make `to` the active slot.
    ///
    /// Flipping to the slot that is already active is a no-op: nothing is
    /// written and `updated_at` is left alone.
    pub fn flip_active(&self, app: &str, to: Slot) -> StateResult<FlipOutcome> {
        let mut outcome = FlipOutcome::Unchanged;
        self.modify(app, |record| {
            if record.active == to {
                return false;
            }
            outcome = FlipOutcome::Flipped {
                from: record.active,
                to,
            };
            record.active = to;
            true
        })?;
        if let FlipOutcome::Flipped { from, to } = outcome {
            info!(%app, %from, %to, "active slot flipped");
        } else {
            debug!(%app, slot = %to, "flip requested to current active slot; no-op");
        }
        Ok(outcome)
    }

    /// Persist the current proxy weights.
    pub fn set_traffic(&self, app: &str, traffic: TrafficState) -> StateResult<EnvironmentRecord> {
        self.modify(app, |record| {
            if record.traffic == traffic {
                return false;
            }
            record.traffic = traffic;
            true
        })
    }

    /// Record what the container runtime started in `slot`.
    pub fn set_slot_runtime(
        &self,
        app: &str,
        slot: Slot,
        version: Option<String>,
        container_group_id: Option<String>,
    ) -> StateResult<EnvironmentRecord> {
        self.modify(app, |record| {
            let state = record.slot_mut(slot);
            if state.version == version && state.container_group_id == container_group_id {
                return false;
            }
            state.version = version;
            state.container_group_id = container_group_id;
            true
        })
    }

    /// Read-modify-write the record for `app` inside one write transaction.
    ///
    /// `f` returns whether it changed anything; unchanged records are not
    /// rewritten.
    fn modify<F>(&self, app: &str, f: F) -> StateResult<EnvironmentRecord>
    where
        F: FnOnce(&mut EnvironmentRecord) -> bool,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
            let bytes = table
                .get(app)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(format!("environments for {app}")))?;
            let mut record: EnvironmentRecord =
                serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;

            if f(&mut record) {
                record.updated_at = epoch_secs();
                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                table
                    .insert(app, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    // ── Deployment history ─────────────────────────────────────────

    /// Insert or update a finished (or in-flight) deployment record.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let key = deployment_key(deployment);
        let value = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "deployment stored");
        Ok(())
    }

    /// Most recent deployments for `app`, newest first.
    pub fn list_deployments(&self, app: &str, limit: usize) -> StateResult<Vec<Deployment>> {
        let prefix = format!("{app}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(deployment);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }
}

fn deployment_key(deployment: &Deployment) -> String {
    format!(
        "{}:{:020}:{}",
        deployment.app, deployment.started_at, deployment.id
    )
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotswap_core::{Operation, Outcome};

    fn endpoints() -> (Endpoint, Endpoint) {
        (
            Endpoint::new("127.0.0.1", 8081),
            Endpoint::new("127.0.0.1", 8082),
        )
    }

    fn seeded(app: &str) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        let (blue, green) = endpoints();
        store.ensure_environments(app, blue, green).unwrap();
        store
    }

    fn test_deployment(app: &str, id: &str, started_at: u64) -> Deployment {
        let mut d = Deployment::new(
            id,
            app,
            Operation::Deploy,
            Some("v1".to_string()),
            Slot::Green,
            started_at,
        );
        d.finish(Outcome::Success, started_at + 5);
        d
    }

    // ── Environments ───────────────────────────────────────────────

    #[test]
    fn first_use_creates_blue_active() {
        let store = seeded("shop");
        let rec = store.get_environments("shop").unwrap().unwrap();
        assert_eq!(rec.active, Slot::Blue);
        assert_eq!(rec.inactive(), Slot::Green);
        assert!(rec.traffic.is_all_on(Slot::Blue));
    }

    #[test]
    fn ensure_is_stable_across_calls() {
        let store = seeded("shop");
        store.flip_active("shop", Slot::Green).unwrap();

        let (blue, green) = endpoints();
        let rec = store.ensure_environments("shop", blue, green).unwrap();
        assert_eq!(rec.active, Slot::Green, "ensure must not reset roles");
    }

    #[test]
    fn ensure_refreshes_endpoints() {
        let store = seeded("shop");
        let rec = store
            .ensure_environments(
                "shop",
                Endpoint::new("10.0.0.1", 9001),
                Endpoint::new("10.0.0.1", 9002),
            )
            .unwrap();
        assert_eq!(rec.green.endpoint.port, 9002);
    }

    #[test]
    fn flip_changes_active() {
        let store = seeded("shop");
        let outcome = store.flip_active("shop", Slot::Green).unwrap();
        assert_eq!(
            outcome,
            FlipOutcome::Flipped {
                from: Slot::Blue,
                to: Slot::Green
            }
        );
        let rec = store.get_environments("shop").unwrap().unwrap();
        assert_eq!(rec.active, Slot::Green);
    }

    #[test]
    fn flip_to_current_is_noop() {
        let store = seeded("shop");
        let before = store.get_environments("shop").unwrap().unwrap();

        assert_eq!(
            store.flip_active("shop", Slot::Blue).unwrap(),
            FlipOutcome::Unchanged
        );
        assert_eq!(
            store.flip_active("shop", Slot::Blue).unwrap(),
            FlipOutcome::Unchanged
        );

        let after = store.get_environments("shop").unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn flip_unknown_app_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(matches!(
            store.flip_active("ghost", Slot::Green),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn apps_are_independent() {
        let store = seeded("shop");
        let (blue, green) = endpoints();
        store.ensure_environments("blog", blue, green).unwrap();

        store.flip_active("shop", Slot::Green).unwrap();
        let blog = store.get_environments("blog").unwrap().unwrap();
        assert_eq!(blog.active, Slot::Blue);
    }

    #[test]
    fn traffic_and_slot_runtime_persist() {
        let store = seeded("shop");
        store
            .set_traffic("shop", TrafficState::new(50, 50).unwrap())
            .unwrap();
        store
            .set_slot_runtime(
                "shop",
                Slot::Green,
                Some("v2".to_string()),
                Some("shop-green".to_string()),
            )
            .unwrap();

        let rec = store.get_environments("shop").unwrap().unwrap();
        assert_eq!(rec.traffic, TrafficState::new(50, 50).unwrap());
        assert_eq!(rec.green.version.as_deref(), Some("v2"));
        assert_eq!(rec.green.container_group_id.as_deref(), Some("shop-green"));
        assert_eq!(rec.blue.version, None);
    }

    // ── Deployment history ─────────────────────────────────────────

    #[test]
    fn deployments_listed_newest_first() {
        let store = seeded("shop");
        store.put_deployment(&test_deployment("shop", "a", 100)).unwrap();
        store.put_deployment(&test_deployment("shop", "b", 200)).unwrap();
        store.put_deployment(&test_deployment("shop", "c", 300)).unwrap();
        store.put_deployment(&test_deployment("blog", "x", 400)).unwrap();

        let recent = store.list_deployments("shop", 2).unwrap();
        let ids: Vec<_> = recent.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);

        assert_eq!(store.list_deployments("blog", 10).unwrap().len(), 1);
        assert!(store.list_deployments("none", 10).unwrap().is_empty());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            let (blue, green) = endpoints();
            store.ensure_environments("shop", blue, green).unwrap();
            store.flip_active("shop", Slot::Green).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let rec = store.get_environments("shop").unwrap().unwrap();
        assert_eq!(rec.active, Slot::Green);
    }
}
