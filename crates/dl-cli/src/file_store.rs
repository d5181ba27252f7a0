use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use dl_core::store::{
    bytes_in_use, KeyValueStore, MemoryStore, StorageMap, StoreError, Subscription, QUOTA_BYTES,
};

/// Key-value store persisted as a single JSON object on disk.
///
/// Writes go to a temporary file that is renamed over the store, so a failed
/// write leaves both the file and the in-memory copy untouched.
pub struct FileStore {
    path: PathBuf,
    quota: usize,
    inner: MemoryStore,
}

impl FileStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let data = if path.exists() {
            let text = fs::read_to_string(path)?;
            if text.trim().is_empty() {
                StorageMap::new()
            } else {
                match serde_json::from_str::<Value>(&text)? {
                    Value::Object(map) => map,
                    _ => {
                        return Err(StoreError::Unavailable(format!(
                            "'{}' is not a JSON object",
                            path.display()
                        )))
                    }
                }
            }
        } else {
            StorageMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            quota: QUOTA_BYTES,
            inner: MemoryStore::from_map(data),
        })
    }

    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = quota;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &StorageMap) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, keys: &[&str]) -> Result<StorageMap, StoreError> {
        self.inner.get(keys)
    }

    fn get_all(&self) -> Result<StorageMap, StoreError> {
        self.inner.get_all()
    }

    fn set(&self, items: StorageMap) -> Result<(), StoreError> {
        let mut next = self.inner.snapshot();
        let before = next.clone();
        next.extend(items.clone());
        if next == before {
            return Ok(());
        }

        let needed = bytes_in_use(&next)?;
        if needed > self.quota {
            return Err(StoreError::QuotaExceeded {
                needed,
                quota: self.quota,
            });
        }

        self.persist(&next)?;
        self.inner.set(items)
    }

    fn subscribe(&self) -> Subscription {
        self.inner.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dl_core::{StateKeys, StateSync};
    use serde_json::json;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dl-cli-test-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir.join("storage.json")
    }

    #[test]
    fn test_round_trip_through_disk() {
        let path = temp_path("roundtrip");
        {
            let store = FileStore::open(&path).unwrap();
            let sync = StateSync::new(&store);
            sync.set_enabled(false).unwrap();
            sync.increment_blocked_count().unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        let raw = reopened.get_all().unwrap();
        assert_eq!(raw["enabled"], json!(false));
        assert_eq!(raw["blockedCount"], json!(1));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_quota_failure_leaves_file() {
        let path = temp_path("quota");
        let store = FileStore::open(&path).unwrap().with_quota(16);
        let feed = store.subscribe();
        StateSync::new(&store).set_enabled(false).unwrap();
        assert_eq!(feed.try_next().unwrap().keys(), StateKeys::ENABLED);

        assert!(StateSync::new(&store).reset_settings().is_err());
        assert!(feed.try_next().is_none());

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(Value::Object(reopened.get_all().unwrap()), json!({ "enabled": false }));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_rejects_non_object_file() {
        let path = temp_path("shape");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(FileStore::open(&path), Err(StoreError::Unavailable(_))));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
