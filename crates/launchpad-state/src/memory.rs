//! In-memory state store.

use async_trait::async_trait;
use launchpad_core::Result;
use launchpad_core::state::{StateSnapshot, StateStore};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{StateError, check_environment};

/// Keeps snapshots in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshots: RwLock<HashMap<String, StateSnapshot>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, environment: &str) -> Result<StateSnapshot> {
        check_environment(environment)?;
        Ok(self
            .snapshots
            .read()
            .await
            .get(environment)
            .cloned()
            .unwrap_or_else(|| StateSnapshot::empty(environment)))
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<u64> {
        check_environment(&snapshot.environment)?;
        let mut snapshots = self.snapshots.write().await;
        let current = snapshots
            .get(&snapshot.environment)
            .map(|s| s.serial)
            .unwrap_or(0);
        if current != snapshot.serial {
            return Err(StateError::SerialConflict {
                environment: snapshot.environment.clone(),
                current,
                given: snapshot.serial,
            }
            .into());
        }

        let mut next = snapshot.clone();
        next.serial += 1;
        let serial = next.serial;
        snapshots.insert(next.environment.clone(), next);
        Ok(serial)
    }
}
