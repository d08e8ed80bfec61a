//! JSON state files, one per environment.

use async_trait::async_trait;
use launchpad_core::Result;
use launchpad_core::state::{StateSnapshot, StateStore};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{StateError, StateResult, check_environment};

/// Stores `<dir>/<environment>.json`, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, environment: &str) -> PathBuf {
        self.dir.join(format!("{environment}.json"))
    }

    async fn read(&self, environment: &str) -> StateResult<StateSnapshot> {
        check_environment(environment)?;
        let path = self.path_for(environment);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(environment, path = %path.display(), "no state file, starting empty");
                return Ok(StateSnapshot::empty(environment));
            }
            Err(source) => return Err(StateError::Io { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt { path, source })
    }

    async fn write(&self, snapshot: &StateSnapshot) -> StateResult<u64> {
        let current = self.read(&snapshot.environment).await?;
        if current.serial != snapshot.serial {
            return Err(StateError::SerialConflict {
                environment: snapshot.environment.clone(),
                current: current.serial,
                given: snapshot.serial,
            });
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StateError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let mut next = snapshot.clone();
        next.serial += 1;
        let json = serde_json::to_vec_pretty(&next)?;

        let path = self.path_for(&snapshot.environment);
        let tmp = self.dir.join(format!(".{}.json.tmp", snapshot.environment));
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|source| StateError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StateError::Io {
                path: path.clone(),
                source,
            })?;

        info!(
            environment = %snapshot.environment,
            serial = next.serial,
            resources = next.len(),
            "state saved"
        );
        Ok(next.serial)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, environment: &str) -> Result<StateSnapshot> {
        Ok(self.read(environment).await?)
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<u64> {
        Ok(self.write(snapshot).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use launchpad_core::state::ObservedResource;
    use launchpad_core::{Resource, ResourceKind};

    fn observed(name: &str) -> ObservedResource {
        ObservedResource {
            resource: Resource::new(ResourceKind::Network, name),
            remote_id: format!("vpc-{name}"),
            applied_attributes: Default::default(),
            outputs: Default::default(),
            applied_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        let snapshot = store.load("production").await.unwrap();
        assert_eq!(snapshot.environment, "production");
        assert_eq!(snapshot.serial, 0);
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn save_bumps_serial_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));

        let mut snapshot = store.load("production").await.unwrap();
        snapshot.insert(observed("main"));
        assert_eq!(store.save(&snapshot).await.unwrap(), 1);

        let mut loaded = store.load("production").await.unwrap();
        assert_eq!(loaded.serial, 1);
        assert_eq!(loaded.len(), 1);
        assert!(store.path_for("production").exists());
        assert!(!dir.path().join("state/.production.json.tmp").exists());

        loaded.insert(observed("edge"));
        assert_eq!(store.save(&loaded).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stale_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        let snapshot = store.load("production").await.unwrap();
        store.save(&snapshot).await.unwrap();

        let err = store.save(&snapshot).await.unwrap_err();
        assert!(matches!(err, launchpad_core::Error::Storage(_)));
    }

    #[tokio::test]
    async fn environments_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        let mut staging = store.load("staging").await.unwrap();
        staging.insert(observed("main"));
        store.save(&staging).await.unwrap();

        assert!(store.load("production").await.unwrap().is_empty());
        assert_eq!(store.load("staging").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        std::fs::write(store.path_for("production"), b"{ not json").unwrap();

        assert!(store.load("production").await.is_err());
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        assert!(store.load("../etc/passwd").await.is_err());
        assert!(store.load("").await.is_err());
    }
}
