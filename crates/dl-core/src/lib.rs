//! DomainLock Core Library
//!
//! This crate provides the allow-list matcher and the state plumbing shared by
//! the DomainLock extension contexts (background worker, content script and
//! popup/options UI).
//!
//! # Architecture
//!
//! All persistent state lives in a single key-value store. Each context holds
//! a cached copy that is refreshed from change notifications, so there is no
//! in-memory authority outside the store. The page-level overlay is a pure
//! state machine: it consumes settings and emits effects, and the host applies
//! those effects to the DOM.
//!
//! # Modules
//!
//! - `types`: Settings, stats and persisted key catalogue
//! - `allowlist`: Normalized allow-list of domains
//! - `url`: Host extraction without allocations
//! - `matcher`: Dot-anchored allow-list matching
//! - `store`: Key-value store trait, in-memory store and change notifications
//! - `sync`: Typed settings/stats access and per-context caches
//! - `messaging`: Background request/response protocol
//! - `overlay`: Page-level blocking state machine

pub mod allowlist;
pub mod matcher;
pub mod messaging;
pub mod overlay;
pub mod store;
pub mod sync;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use allowlist::{AllowList, AllowListError, DEFAULT_ALLOWED_DOMAINS};
pub use matcher::{is_blocked, is_url_blocked, Decision, DomainMatcher, MatchResult};
pub use messaging::{Background, Request, Response};
pub use overlay::{CountPolicy, Effect, Event, OverlayController, OverlayState};
pub use store::{KeyValueStore, MemoryStore, StorageChange, StoreError, Subscription};
pub use sync::{InstallReason, StateCache, StateSync, SyncError};
pub use types::{keys, LastReset, Settings, SettingsPatch, StateKeys, Stats};
