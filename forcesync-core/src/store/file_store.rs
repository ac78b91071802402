/*
    file_store.rs - Durable force store on the local filesystem

    One pretty-printed JSON file per force:

        <data_dir>/force-<hex(instanceId)>.json

    Ids arrive from the remote side, so the file name is a reversible
    encoding of the id rather than the id itself. A file whose contents name
    a different instance id than the one requested is treated as corrupt.

    Writes go to a temporary sibling first and are renamed into place, so a
    crash mid-write never leaves a truncated snapshot behind.
*/

use super::errors::{StoreError, StoreResult};
use super::ForceStore;
use crate::model::{ForceId, ForceSnapshot};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const FILE_PREFIX: &str = "force-";
const FILE_SUFFIX: &str = ".json";

#[derive(Debug, Clone)]
pub struct FileForceStore {
    data_dir: PathBuf,
}

impl FileForceStore {
    /// Open (and create if needed) a store rooted at `data_dir`
    pub async fn open(data_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).await?;
        debug!(data_dir = %data_dir.display(), "opened force store");
        Ok(FileForceStore { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, id: &ForceId) -> PathBuf {
        let encoded = hex::encode(id.as_str().as_bytes());
        self.data_dir.join(format!("{}{}{}", FILE_PREFIX, encoded, FILE_SUFFIX))
    }

    async fn read_snapshot(path: &Path) -> StoreResult<ForceSnapshot> {
        let bytes = fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ForceStore for FileForceStore {
    async fn get_force(&self, id: &ForceId) -> StoreResult<Option<ForceSnapshot>> {
        let path = self.path_for(id);
        match Self::read_snapshot(&path).await {
            Ok(snapshot) if snapshot.instance_id.as_ref() == Some(id) => Ok(Some(snapshot)),
            Ok(snapshot) => Err(StoreError::CorruptedData(format!(
                "{} holds {:?}, expected {}",
                path.display(),
                snapshot.instance_id,
                id
            ))),
            Err(StoreError::Storage(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(StoreError::Serialization(e)) => Err(StoreError::CorruptedData(format!(
                "{}: {}",
                path.display(),
                e
            ))),
            Err(e) => Err(e),
        }
    }

    async fn save_force(&self, snapshot: &ForceSnapshot) -> StoreResult<()> {
        let id = snapshot.instance_id.as_ref().ok_or(StoreError::MissingInstanceId)?;
        let path = self.path_for(id);
        let tmp = path.with_extension("json.tmp");

        let bytes = serde_json::to_vec_pretty(snapshot)?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        debug!(instance_id = %id, path = %path.display(), "force saved locally");
        Ok(())
    }

    async fn delete_force(&self, id: &ForceId) -> StoreResult<bool> {
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_forces(&self) -> StoreResult<Vec<ForceSnapshot>> {
        let mut entries = fs::read_dir(&self.data_dir).await?;
        let mut forces = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(FILE_PREFIX) || !name.ends_with(FILE_SUFFIX) {
                continue;
            }
            match Self::read_snapshot(&entry.path()).await {
                Ok(snapshot) => forces.push(snapshot),
                Err(e) => {
                    warn!(file = %name, error = %e, "skipping unreadable force file");
                }
            }
        }

        forces.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(forces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GameSystem;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileForceStore::open(dir.path()).await.unwrap();

        let mut force = GameSystem::AlphaStrike.new_force("Strike Star");
        let group = force.add_group("Star");
        force
            .add_unit(&group, GameSystem::AlphaStrike.new_unit("Timber Wolf Prime"))
            .unwrap();
        let snapshot = force.to_snapshot();
        let id = snapshot.instance_id.clone().unwrap();

        store.save_force(&snapshot).await.unwrap();
        assert_eq!(store.get_force(&id).await.unwrap(), Some(snapshot));

        let reopened = FileForceStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list_forces().await.unwrap().len(), 1);

        assert!(store.delete_force(&id).await.unwrap());
        assert_eq!(store.get_force(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let store = FileForceStore::open(dir.path()).await.unwrap();

        let mut force = GameSystem::Classic.new_force("Good");
        store.save_force(&force.to_snapshot()).await.unwrap();
        let broken_path = store.path_for(&ForceId::new("broken"));
        std::fs::write(&broken_path, b"{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let forces = store.list_forces().await.unwrap();
        assert_eq!(forces.len(), 1);
        assert_eq!(forces[0].name, "Good");

        let broken = store.get_force(&ForceId::new("broken")).await;
        assert!(matches!(broken, Err(StoreError::CorruptedData(_))));
    }

    #[tokio::test]
    async fn test_similar_ids_do_not_share_a_file() {
        let dir = TempDir::new().unwrap();
        let store = FileForceStore::open(dir.path()).await.unwrap();

        for (id, name) in [("a.b", "A"), ("a_b", "B"), ("a/b", "C")] {
            let mut force = GameSystem::Classic.new_force(name);
            let mut snapshot = force.to_snapshot();
            snapshot.instance_id = Some(ForceId::new(id));
            store.save_force(&snapshot).await.unwrap();
        }

        let dotted = store.get_force(&ForceId::new("a.b")).await.unwrap().unwrap();
        assert_eq!(dotted.instance_id, Some(ForceId::new("a.b")));
        assert_eq!(dotted.name, "A");
        let underscored = store.get_force(&ForceId::new("a_b")).await.unwrap().unwrap();
        assert_eq!(underscored.name, "B");
        assert_eq!(store.list_forces().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_mismatched_file_contents_are_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = FileForceStore::open(dir.path()).await.unwrap();

        let mut force = GameSystem::Classic.new_force("Misplaced");
        let snapshot = force.to_snapshot();
        let bytes = serde_json::to_vec(&snapshot).unwrap();
        std::fs::write(store.path_for(&ForceId::new("other")), bytes).unwrap();

        let result = store.get_force(&ForceId::new("other")).await;
        assert!(matches!(result, Err(StoreError::CorruptedData(_))));
    }

    #[tokio::test]
    async fn test_ids_cannot_escape_data_dir() {
        let dir = TempDir::new().unwrap();
        let store = FileForceStore::open(dir.path()).await.unwrap();
        let path = store.path_for(&ForceId::new("../../etc/passwd"));
        assert_eq!(path.parent(), Some(dir.path()));
    }
}
