//! Filesystem-backed durable store.
//!
//! Layout: `<root>/<segment>/<segment>/...`, one file per key. Writes go to
//! a scratch file in the destination directory which is fsynced and then
//! renamed over the destination, so a crash mid-write leaves the previous
//! value in place.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{DurableStore, StorageResult, StoreKey};

const SCRATCH_PREFIX: &str = ".pw-tmp-";

/// Durable store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &StoreKey) -> PathBuf {
        key.segments()
            .fold(self.root.clone(), |path, seg| path.join(seg))
    }
}

async fn blocking<T, F>(f: F) -> StorageResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StorageResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}

fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StorageError::io(path, std::io::ErrorKind::InvalidInput.into()))?;
    fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempfile_in(dir)
        .map_err(|e| StorageError::io(dir, e))?;
    tmp.write_all(data).map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| StorageError::io(path, e.error))?;

    // Make the rename itself durable.
    #[cfg(unix)]
    {
        let handle = fs::File::open(dir).map_err(|e| StorageError::io(dir, e))?;
        handle.sync_all().map_err(|e| StorageError::io(dir, e))?;
    }
    Ok(())
}

fn collect_keys(root: &Path, dir: &Path, out: &mut Vec<StoreKey>) -> StorageResult<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StorageError::io(dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io(dir, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| StorageError::io(&path, e))?;
        if file_type.is_dir() {
            collect_keys(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            // Files dropped in by hand that violate the grammar are not ours.
            if let Ok(key) = StoreKey::new(rel) {
                out.push(key);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DurableStore for FsStore {
    async fn put_atomic(&self, key: &StoreKey, data: &[u8]) -> StorageResult<()> {
        let path = self.path_for(key);
        let data = data.to_vec();
        debug!(key = %key, bytes = data.len(), "fs store write");
        blocking(move || write_atomic(&path, &data)).await
    }

    async fn get(&self, key: &StoreKey) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_for(key);
        blocking(move || match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&path, e)),
        })
        .await
    }

    async fn list(&self, prefix: &StoreKey) -> StorageResult<Vec<StoreKey>> {
        let root = self.root.clone();
        let dir = self.path_for(prefix);
        blocking(move || {
            let mut keys = Vec::new();
            if dir.is_file() {
                if let Ok(rel) = dir.strip_prefix(&root) {
                    if let Ok(key) = StoreKey::new(rel.to_string_lossy().replace('\\', "/")) {
                        keys.push(key);
                    }
                }
            } else {
                collect_keys(&root, &dir, &mut keys)?;
            }
            keys.sort();
            Ok(keys)
        })
        .await
    }

    async fn delete(&self, key: &StoreKey) -> StorageResult<()> {
        let path = self.path_for(key);
        blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&path, e)),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn key(s: &str) -> StoreKey {
        StoreKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn write_then_read() {
        let (_dir, store) = make_store();
        store.put_atomic(&key("run/a.json"), b"{}").await.unwrap();
        assert_eq!(
            store.get(&key("run/a.json")).await.unwrap(),
            Some(b"{}".to_vec())
        );
    }

    #[tokio::test]
    async fn overwrite_replaces_whole_value() {
        let (_dir, store) = make_store();
        let k = key("run/latest.json");
        store.put_atomic(&k, b"first value, quite long").await.unwrap();
        store.put_atomic(&k, b"second").await.unwrap();
        assert_eq!(store.get(&k).await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn scratch_files_are_invisible() {
        let (dir, store) = make_store();
        store.put_atomic(&key("run/a.json"), b"1").await.unwrap();
        // Simulate a crash that left a scratch file behind.
        std::fs::write(dir.path().join("run").join(".pw-tmp-abc"), b"partial").unwrap();

        let keys = store.list(&key("run")).await.unwrap();
        assert_eq!(keys, vec![key("run/a.json")]);
    }

    #[tokio::test]
    async fn no_scratch_file_left_after_write() {
        let (dir, store) = make_store();
        store.put_atomic(&key("run/a.json"), b"1").await.unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path().join("run"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json".to_string()]);
    }

    #[tokio::test]
    async fn list_missing_prefix_is_empty() {
        let (_dir, store) = make_store();
        assert!(store.list(&key("nothing-here")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_missing_is_noop() {
        let (_dir, store) = make_store();
        store.delete(&key("run/absent.json")).await.unwrap();
    }
}
