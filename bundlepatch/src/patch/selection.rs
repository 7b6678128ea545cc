//! Persisted last-group selection.
//!
//! One small JSON record per instance id, read when groups are planned so a
//! restarted app resumes the group the user picked:
//!
//! ```json
//! { "groupName": "ui", "tags": ["ui"] }
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use super::events::InstanceId;
use super::planner::GroupInfo;
use crate::BoxFuture;

/// Errors from the selection store.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("I/O error on selection record {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where the last selected group of each instance lives.
pub trait SelectionStore: Send + Sync {
    /// The stored selection; unreadable records count as absent.
    fn load(&self, instance: InstanceId) -> BoxFuture<'_, Option<GroupInfo>>;

    fn save<'a>(
        &'a self,
        instance: InstanceId,
        group: &'a GroupInfo,
    ) -> BoxFuture<'a, Result<(), SelectionError>>;

    /// Remove the record. Removing a missing record succeeds.
    fn clear(&self, instance: InstanceId) -> BoxFuture<'_, Result<(), SelectionError>>;
}

/// [`SelectionStore`] writing `last_group_<id>.json` files into a directory.
#[derive(Debug, Clone)]
pub struct FileSelectionStore {
    dir: PathBuf,
}

impl FileSelectionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, instance: InstanceId) -> PathBuf {
        self.dir.join(format!("last_group_{}.json", instance))
    }
}

impl SelectionStore for FileSelectionStore {
    fn load(&self, instance: InstanceId) -> BoxFuture<'_, Option<GroupInfo>> {
        Box::pin(async move {
            let path = self.record_path(instance);
            let text = tokio::fs::read_to_string(&path).await.ok()?;
            match serde_json::from_str::<GroupInfo>(&text) {
                Ok(group) => Some(GroupInfo::new(group.group_name, group.tags)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring corrupt group selection");
                    None
                }
            }
        })
    }

    fn save<'a>(
        &'a self,
        instance: InstanceId,
        group: &'a GroupInfo,
    ) -> BoxFuture<'a, Result<(), SelectionError>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|source| SelectionError::Io {
                    path: self.dir.clone(),
                    source,
                })?;

            let path = self.record_path(instance);
            // Totals are recomputed on every run; only the choice is kept.
            let record = GroupInfo::new(group.group_name.clone(), group.tags.clone());
            let json = serde_json::to_string(&record).unwrap_or_default();
            tokio::fs::write(&path, json)
                .await
                .map_err(|source| SelectionError::Io {
                    path: path.clone(),
                    source,
                })?;
            debug!(instance = %instance, group = %group.group_name, "Saved group selection");
            Ok(())
        })
    }

    fn clear(&self, instance: InstanceId) -> BoxFuture<'_, Result<(), SelectionError>> {
        Box::pin(async move {
            let path = self.record_path(instance);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(instance = %instance, "Cleared group selection");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(SelectionError::Io { path, source }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_drops_totals() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSelectionStore::new(dir.path().join("selection"));
        let mut group = GroupInfo::new("ui", vec!["ui".into()]);
        group.total_count = 5;
        group.total_bytes = 1024;

        store.save(InstanceId::APP, &group).await.unwrap();
        let loaded = store.load(InstanceId::APP).await.unwrap();
        assert_eq!(loaded, GroupInfo::new("ui", vec!["ui".into()]));

        let text = std::fs::read_to_string(store.record_path(InstanceId::APP)).unwrap();
        assert!(!text.contains("totalBytes"));
    }

    #[tokio::test]
    async fn test_records_are_per_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSelectionStore::new(dir.path());
        store.save(InstanceId(1), &GroupInfo::all()).await.unwrap();

        assert!(store.load(InstanceId(2)).await.is_none());
        store.clear(InstanceId(2)).await.unwrap();
        assert!(store.load(InstanceId(1)).await.is_some());

        store.clear(InstanceId(1)).await.unwrap();
        assert!(store.load(InstanceId(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSelectionStore::new(dir.path());
        std::fs::write(store.record_path(InstanceId::APP), "{oops").unwrap();
        assert!(store.load(InstanceId::APP).await.is_none());
    }
}
