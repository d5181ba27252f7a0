//! Shared key-value store
//!
//! Models the extension's `storage.local` area: a single process-wide map of
//! JSON values, written as whole keys and observed through change
//! notifications. Every handle to the same store sees every committed write,
//! in commit order, regardless of which handle performed it.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::StateKeys;

/// Raw storage entries.
pub type StorageMap = Map<String, Value>;

/// Default byte quota of the browser's local storage area.
pub const QUOTA_BYTES: usize = 10_485_760;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage quota exceeded: {needed} bytes needed, quota is {quota}")]
    QuotaExceeded { needed: usize, quota: usize },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// Change Notifications
// =============================================================================

/// Storage area a change belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    Local,
    Sync,
}

impl StorageArea {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "sync" => Some(Self::Sync),
            _ => None,
        }
    }
}

/// Old and new value of one key. `None` means the key was absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// One committed write, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageChange {
    pub area: StorageArea,
    pub changes: BTreeMap<String, ValueChange>,
}

impl StorageChange {
    /// Decode a browser `onChanged` payload: an object mapping each key to
    /// `{oldValue, newValue}`. Returns `None` for unknown areas or a payload
    /// of the wrong shape.
    pub fn from_wire(area: &str, changes: &Value) -> Option<Self> {
        let area = StorageArea::from_str(area)?;
        let changes = serde_json::from_value(changes.clone()).ok()?;
        Some(Self { area, changes })
    }

    /// Known keys touched by this change.
    pub fn keys(&self) -> StateKeys {
        StateKeys::from_keys(self.changes.keys().map(String::as_str))
    }

    pub fn get(&self, key: &str) -> Option<&ValueChange> {
        self.changes.get(key)
    }

    /// New value of `key`, if this change wrote it.
    pub fn new_value(&self, key: &str) -> Option<&Value> {
        self.changes.get(key).and_then(|c| c.new_value.as_ref())
    }
}

/// Receiving end of a store's change feed.
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
    rx: Receiver<StorageChange>,
}

impl Subscription {
    /// Create a subscription and the sender that feeds it.
    pub fn channel() -> (Sender<StorageChange>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }

    /// Next pending change without blocking.
    pub fn try_next(&self) -> Option<StorageChange> {
        self.rx.try_recv().ok()
    }

    /// All pending changes, oldest first.
    pub fn drain(&self) -> Vec<StorageChange> {
        self.rx.try_iter().collect()
    }
}

// =============================================================================
// Store Trait
// =============================================================================

/// Shared key-value store seen by every context.
///
/// Writes are atomic per call: either every key in `set` is committed and a
/// single notification is sent, or nothing changes. There is no transaction
/// across calls; concurrent writers are last-write-wins per key.
pub trait KeyValueStore {
    /// Read the given keys. Absent keys are omitted from the result.
    fn get(&self, keys: &[&str]) -> Result<StorageMap, StoreError>;

    /// Read every key.
    fn get_all(&self) -> Result<StorageMap, StoreError>;

    /// Write the given keys.
    fn set(&self, items: StorageMap) -> Result<(), StoreError>;

    /// Subscribe to committed changes.
    fn subscribe(&self) -> Subscription;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for &T {
    fn get(&self, keys: &[&str]) -> Result<StorageMap, StoreError> {
        (**self).get(keys)
    }

    fn get_all(&self) -> Result<StorageMap, StoreError> {
        (**self).get_all()
    }

    fn set(&self, items: StorageMap) -> Result<(), StoreError> {
        (**self).set(items)
    }

    fn subscribe(&self) -> Subscription {
        (**self).subscribe()
    }
}

// =============================================================================
// In-memory Store
// =============================================================================

struct Shared {
    area: StorageArea,
    quota: Option<usize>,
    data: RwLock<StorageMap>,
    subscribers: Mutex<Vec<Sender<StorageChange>>>,
}

/// In-memory store. Clones share the same state and change feed, so one
/// clone per context models the browser's process-wide storage.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::from_map(StorageMap::new())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `data`. No notification is sent for it.
    pub fn from_map(data: StorageMap) -> Self {
        Self {
            shared: Arc::new(Shared {
                area: StorageArea::Local,
                quota: None,
                data: RwLock::new(data),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Store that rejects writes growing past `quota` bytes.
    pub fn with_quota(data: StorageMap, quota: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                area: StorageArea::Local,
                quota: Some(quota),
                data: RwLock::new(data),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> StorageMap {
        self.shared
            .data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Bytes used, counted as key length plus serialized value length.
    pub fn bytes_in_use(&self) -> Result<usize, StoreError> {
        let data = self.shared.data.read().unwrap_or_else(|e| e.into_inner());
        bytes_in_use(&data)
    }

    fn broadcast(&self, change: StorageChange) {
        let mut subscribers = self
            .shared
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

/// Size of `data` as the browser counts it: key length plus serialized
/// value length, summed over every entry.
pub fn bytes_in_use(data: &StorageMap) -> Result<usize, StoreError> {
    let mut total = 0usize;
    for (key, value) in data {
        total += key.len() + serde_json::to_string(value)?.len();
    }
    Ok(total)
}

impl KeyValueStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<StorageMap, StoreError> {
        let data = self.shared.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(keys
            .iter()
            .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    fn get_all(&self) -> Result<StorageMap, StoreError> {
        Ok(self.snapshot())
    }

    fn set(&self, items: StorageMap) -> Result<(), StoreError> {
        // The write lock is held through broadcast so notifications leave in
        // commit order.
        let mut data = self.shared.data.write().unwrap_or_else(|e| e.into_inner());

        let mut changes = BTreeMap::new();
        for (key, new_value) in &items {
            let old_value = data.get(key);
            if old_value == Some(new_value) {
                continue;
            }
            changes.insert(
                key.clone(),
                ValueChange {
                    old_value: old_value.cloned(),
                    new_value: Some(new_value.clone()),
                },
            );
        }

        if changes.is_empty() {
            return Ok(());
        }

        if let Some(quota) = self.shared.quota {
            let mut next = data.clone();
            next.extend(items.clone());
            let needed = bytes_in_use(&next)?;
            if needed > quota {
                log::warn!("storage write rejected: {} bytes over quota {}", needed, quota);
                return Err(StoreError::QuotaExceeded { needed, quota });
            }
        }

        data.extend(items);
        self.broadcast(StorageChange {
            area: self.shared.area,
            changes,
        });
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        let (tx, subscription) = Subscription::channel();
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        subscription
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries(value: Value) -> StorageMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_get_and_set() {
        let store = MemoryStore::new();
        store.set(entries(json!({ "enabled": true, "blockedCount": 2 }))).unwrap();

        let got = store.get(&["enabled", "missing"]).unwrap();
        assert_eq!(Value::Object(got), json!({ "enabled": true }));
        assert_eq!(store.get_all().unwrap().len(), 2);
    }

    #[test]
    fn test_clones_share_state_and_notifications() {
        let background = MemoryStore::new();
        let popup = background.clone();
        let feed = popup.subscribe();

        background.set(entries(json!({ "enabled": false }))).unwrap();

        assert_eq!(popup.get(&["enabled"]).unwrap()["enabled"], json!(false));
        let change = feed.try_next().expect("change delivered");
        assert_eq!(change.area, StorageArea::Local);
        assert_eq!(change.keys(), StateKeys::ENABLED);
        let enabled = change.get("enabled").unwrap();
        assert_eq!(enabled.old_value, None);
        assert_eq!(enabled.new_value, Some(json!(false)));
    }

    #[test]
    fn test_unchanged_values_not_notified() {
        let store = MemoryStore::from_map(entries(json!({ "enabled": true, "blockedCount": 1 })));
        let feed = store.subscribe();

        store.set(entries(json!({ "enabled": true }))).unwrap();
        assert!(feed.try_next().is_none());

        store.set(entries(json!({ "enabled": true, "blockedCount": 2 }))).unwrap();
        let change = feed.try_next().unwrap();
        assert_eq!(change.keys(), StateKeys::BLOCKED_COUNT);
    }

    #[test]
    fn test_notifications_in_commit_order() {
        let store = MemoryStore::new();
        let feed = store.subscribe();
        for n in 1..=5 {
            store.set(entries(json!({ "blockedCount": n }))).unwrap();
        }
        let seen: Vec<Value> = feed
            .drain()
            .iter()
            .filter_map(|c| c.new_value("blockedCount").cloned())
            .collect();
        assert_eq!(seen, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
    }

    #[test]
    fn test_quota_rejects_whole_write() {
        let store = MemoryStore::with_quota(StorageMap::new(), 40);
        let feed = store.subscribe();
        store.set(entries(json!({ "enabled": true }))).unwrap();
        feed.drain();

        let err = store
            .set(entries(json!({ "enabled": false, "allowedDomain": ["a-very-long-domain-name.example"] })))
            .unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { quota: 40, .. }));

        assert_eq!(store.get(&["enabled"]).unwrap()["enabled"], json!(true));
        assert!(store.get(&["allowedDomain"]).unwrap().is_empty());
        assert!(feed.try_next().is_none());
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let store = MemoryStore::new();
        let feed = store.subscribe();
        drop(feed);
        store.set(entries(json!({ "enabled": false }))).unwrap();
        assert!(store.shared.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_from_wire() {
        let change = StorageChange::from_wire(
            "local",
            &json!({
                "enabled": { "oldValue": true, "newValue": false },
                "lastReset": { "newValue": "Never" },
            }),
        )
        .unwrap();
        assert_eq!(change.keys(), StateKeys::ENABLED | StateKeys::LAST_RESET);
        assert_eq!(change.new_value("enabled"), Some(&json!(false)));
        assert_eq!(change.get("lastReset").unwrap().old_value, None);

        assert!(StorageChange::from_wire("managed", &json!({})).is_none());
        assert!(StorageChange::from_wire("local", &json!([1, 2])).is_none());
    }

    #[test]
    fn test_bytes_in_use() {
        let store = MemoryStore::from_map(entries(json!({ "enabled": true })));
        assert_eq!(store.bytes_in_use().unwrap(), "enabled".len() + "true".len());
    }
}
