//! Background request/response protocol
//!
//! The popup and options pages talk to the background worker with small JSON
//! messages keyed by `action`. The background keeps no state of its own: each
//! request is answered straight from the shared store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::KeyValueStore;
use crate::sync::{InstallReason, StateSync, SyncError};

/// A message sent to the background context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    GetStats,
    ToggleEnabled { enabled: bool },
    ResetStats,
}

/// Reply to a `Request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Stats {
        #[serde(rename = "blockedCount")]
        blocked_count: u64,
        enabled: bool,
    },
    Ack {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Response {
    pub fn ok() -> Self {
        Self::Ack {
            success: true,
            error: None,
        }
    }

    pub fn failure(err: &SyncError) -> Self {
        Self::Ack {
            success: false,
            error: Some(err.to_string()),
        }
    }

    /// `false` only for a failed acknowledgement.
    pub fn is_success(&self) -> bool {
        match self {
            Self::Stats { .. } => true,
            Self::Ack { success, .. } => *success,
        }
    }
}

/// Background-context message handler.
pub struct Background<S> {
    sync: StateSync<S>,
}

impl<S: KeyValueStore> Background<S> {
    pub fn new(store: S) -> Self {
        Self {
            sync: StateSync::new(store),
        }
    }

    pub fn sync(&self) -> &StateSync<S> {
        &self.sync
    }

    /// Runtime installed hook.
    pub fn on_installed(&self, reason: InstallReason) -> Result<bool, SyncError> {
        self.sync.install(reason)
    }

    /// Answer a typed request. Store failures become a failed `Ack` so the
    /// caller can show the message.
    pub fn handle(&self, request: &Request) -> Response {
        let result = match request {
            Request::GetStats => self.get_stats(),
            Request::ToggleEnabled { enabled } => {
                self.sync.set_enabled(*enabled).map(|()| Response::ok())
            }
            Request::ResetStats => self.sync.reset_stats().map(|_| Response::ok()),
        };

        result.unwrap_or_else(|e| {
            log::warn!("{:?} failed: {}", request, e);
            Response::failure(&e)
        })
    }

    fn get_stats(&self) -> Result<Response, SyncError> {
        let stats = self.sync.get_stats()?;
        let enabled = self.sync.is_enabled()?;
        Ok(Response::Stats {
            blocked_count: stats.blocked_count,
            enabled,
        })
    }

    /// Wire entry point. Messages that are not a known request get no reply.
    pub fn handle_json(&self, message: &Value) -> Option<Value> {
        let request: Request = match serde_json::from_value(message.clone()) {
            Ok(request) => request,
            Err(e) => {
                log::debug!("ignoring message {}: {}", message, e);
                return None;
            }
        };
        serde_json::to_value(self.handle(&request)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StorageMap};
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let req: Request = serde_json::from_value(json!({ "action": "getStats" })).unwrap();
        assert_eq!(req, Request::GetStats);

        let req: Request =
            serde_json::from_value(json!({ "action": "toggleEnabled", "enabled": false })).unwrap();
        assert_eq!(req, Request::ToggleEnabled { enabled: false });

        assert_eq!(
            serde_json::to_value(Request::ResetStats).unwrap(),
            json!({ "action": "resetStats" })
        );
    }

    #[test]
    fn test_get_stats_defaults() {
        let bg = Background::new(MemoryStore::new());
        let reply = bg.handle_json(&json!({ "action": "getStats" })).unwrap();
        assert_eq!(reply, json!({ "blockedCount": 0, "enabled": true }));
    }

    #[test]
    fn test_toggle_writes_store() {
        let store = MemoryStore::new();
        let bg = Background::new(store.clone());

        let reply = bg.handle(&Request::ToggleEnabled { enabled: false });
        assert_eq!(reply, Response::ok());
        assert_eq!(store.get(&["enabled"]).unwrap()["enabled"], json!(false));

        // Another handle to the same store sees the toggle without messaging.
        let other = Background::new(store.clone());
        assert_eq!(
            other.handle(&Request::GetStats),
            Response::Stats {
                blocked_count: 0,
                enabled: false
            }
        );
    }

    #[test]
    fn test_reset_stats_reply() {
        let store = MemoryStore::new();
        let bg = Background::new(store.clone());
        bg.sync().increment_blocked_count().unwrap();

        let reply = bg.handle_json(&json!({ "action": "resetStats" })).unwrap();
        assert_eq!(reply, json!({ "success": true }));
        assert_eq!(bg.sync().get_stats().unwrap().blocked_count, 0);
        assert!(store.get(&["lastReset"]).unwrap().contains_key("lastReset"));
    }

    #[test]
    fn test_unknown_action_has_no_reply() {
        let bg = Background::new(MemoryStore::new());
        assert_eq!(bg.handle_json(&json!({ "action": "openSettings" })), None);
        assert_eq!(bg.handle_json(&json!("getStats")), None);
        assert_eq!(bg.handle_json(&json!({ "action": "toggleEnabled" })), None);
    }

    #[test]
    fn test_store_failure_reply() {
        let bg = Background::new(MemoryStore::with_quota(StorageMap::new(), 4));
        let reply = bg.handle(&Request::ToggleEnabled { enabled: false });
        assert!(!reply.is_success());

        let wire = serde_json::to_value(&reply).unwrap();
        assert_eq!(wire["success"], json!(false));
        assert!(wire["error"].as_str().unwrap().contains("quota"));
    }
}
