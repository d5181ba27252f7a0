//! Typed state access over the shared store
//!
//! `StateSync` is the only writer-facing API: every context reads and writes
//! settings and statistics through it, and the store stays the single source
//! of truth. `StateCache` is the read-only copy a context keeps between
//! notifications.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::allowlist::AllowListError;
use crate::store::{KeyValueStore, StorageArea, StorageChange, StorageMap, StoreError, Subscription};
use crate::types::{keys, read_count, read_flag, LastReset, Settings, SettingsPatch, StateKeys, Stats};

/// Error type for state synchronization.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    AllowList(#[from] AllowListError),
}

/// Why the runtime fired its installed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    Install,
    Update,
    BrowserUpdate,
    SharedModuleUpdate,
}

impl InstallReason {
    /// Parse from the runtime's reason string.
    pub fn from_str(s: &str) -> Self {
        match s {
            "install" => Self::Install,
            "chrome_update" | "browser_update" => Self::BrowserUpdate,
            "shared_module_update" => Self::SharedModuleUpdate,
            _ => Self::Update,
        }
    }
}

// =============================================================================
// State Sync
// =============================================================================

/// Settings and statistics operations against a shared store.
pub struct StateSync<S> {
    store: S,
}

impl<S: KeyValueStore> StateSync<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get_settings(&self) -> Result<Settings, SyncError> {
        let map = self.store.get(keys::SETTINGS)?;
        Ok(Settings::from_map(&map))
    }

    /// Current `enabled` flag. An absent key reads as enabled.
    pub fn is_enabled(&self) -> Result<bool, SyncError> {
        let map = self.store.get(&[keys::ENABLED])?;
        Ok(read_flag(&map, keys::ENABLED))
    }

    /// Write the fields set in `patch`. An empty patch is a no-op.
    pub fn set_settings(&self, patch: &SettingsPatch) -> Result<(), SyncError> {
        if patch.is_empty() {
            return Ok(());
        }
        self.store.set(patch.to_map())?;
        log::debug!("settings written: {:?}", patch.keys());
        Ok(())
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), SyncError> {
        self.set_settings(&SettingsPatch::enabled(enabled))?;
        log::info!("extension {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Replace every settings key with its default. Statistics are kept.
    pub fn reset_settings(&self) -> Result<Settings, SyncError> {
        self.set_settings(&SettingsPatch::defaults())?;
        log::info!("settings reset to defaults");
        Ok(Settings::default())
    }

    pub fn get_stats(&self) -> Result<Stats, SyncError> {
        let map = self.store.get(keys::STATS)?;
        Ok(Stats::from_map(&map))
    }

    /// Add one to the block counter and return the new value.
    ///
    /// This is a plain read-modify-write; two contexts incrementing at the
    /// same moment can lose one count.
    pub fn increment_blocked_count(&self) -> Result<u64, SyncError> {
        let map = self.store.get(&[keys::BLOCKED_COUNT])?;
        let next = read_count(&map, keys::BLOCKED_COUNT).saturating_add(1);
        let mut items = StorageMap::new();
        items.insert(keys::BLOCKED_COUNT.to_string(), Value::from(next));
        self.store.set(items)?;
        Ok(next)
    }

    pub fn reset_stats(&self) -> Result<Stats, SyncError> {
        self.reset_stats_at(Utc::now())
    }

    /// Zero the counter and stamp `lastReset` with `now`.
    pub fn reset_stats_at(&self, now: DateTime<Utc>) -> Result<Stats, SyncError> {
        let stats = Stats {
            blocked_count: 0,
            last_reset: LastReset::At(now),
        };
        let mut items = StorageMap::new();
        items.insert(keys::BLOCKED_COUNT.to_string(), Value::from(0u64));
        items.insert(keys::LAST_RESET.to_string(), stats.last_reset.to_value());
        self.store.set(items)?;
        log::info!("statistics reset at {}", stats.last_reset);
        Ok(stats)
    }

    /// Seed defaults on first install. Returns whether anything was written.
    pub fn install(&self, reason: InstallReason) -> Result<bool, SyncError> {
        if reason != InstallReason::Install {
            return Ok(false);
        }
        let defaults = Settings::default();
        let mut items = StorageMap::new();
        items.insert(keys::ENABLED.to_string(), Value::Bool(defaults.enabled));
        items.insert(keys::ALLOWED_DOMAIN.to_string(), defaults.allowed_domains.to_value());
        items.insert(keys::BLOCKED_COUNT.to_string(), Value::from(0u64));
        self.store.set(items)?;
        log::info!("installed with allow-list [{}]", defaults.allowed_domains);
        Ok(true)
    }

    /// Register `callback` for every committed change.
    ///
    /// Changes queue up until the listener is pumped, which is how a
    /// single-threaded context drains its event queue.
    pub fn on_change<F>(&self, callback: F) -> ChangeListener<F>
    where
        F: FnMut(&StorageChange),
    {
        ChangeListener {
            subscription: self.store.subscribe(),
            callback,
        }
    }

    /// Cached copy of the current state, kept fresh by `StateCache::poll`.
    pub fn cache(&self) -> Result<StateCache, SyncError> {
        StateCache::attach(&self.store)
    }
}

/// Callback bound to a store subscription.
pub struct ChangeListener<F> {
    subscription: Subscription,
    callback: F,
}

impl<F: FnMut(&StorageChange)> ChangeListener<F> {
    /// Deliver every pending change. Returns how many were delivered.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(change) = self.subscription.try_next() {
            (self.callback)(&change);
            delivered += 1;
        }
        delivered
    }
}

// =============================================================================
// State Cache
// =============================================================================

/// A context's read-only copy of the shared state.
pub struct StateCache {
    raw: StorageMap,
    settings: Settings,
    stats: Stats,
    subscription: Option<Subscription>,
}

impl StateCache {
    /// Cache fed by the store's change feed.
    ///
    /// Subscribes before the initial read so no write can fall between the
    /// two; a change already reflected in the read is re-applied harmlessly.
    pub fn attach<S: KeyValueStore>(store: &S) -> Result<Self, SyncError> {
        let subscription = store.subscribe();
        let raw = store.get_all()?;
        let mut cache = Self::detached(raw);
        cache.subscription = Some(subscription);
        Ok(cache)
    }

    /// Cache over a raw snapshot, updated only through `apply`.
    pub fn detached(raw: StorageMap) -> Self {
        let settings = Settings::from_map(&raw);
        let stats = Stats::from_map(&raw);
        Self {
            raw,
            settings,
            stats,
            subscription: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn raw(&self) -> &StorageMap {
        &self.raw
    }

    /// Apply one notification. Returns the known keys it touched.
    ///
    /// Changes from other storage areas are ignored.
    pub fn apply(&mut self, change: &StorageChange) -> StateKeys {
        if change.area != StorageArea::Local {
            return StateKeys::empty();
        }
        for (key, value) in &change.changes {
            match value.new_value {
                Some(ref v) => {
                    self.raw.insert(key.clone(), v.clone());
                }
                None => {
                    self.raw.remove(key);
                }
            }
        }

        let touched = change.keys();
        if touched.intersects(StateKeys::SETTINGS) {
            self.settings = Settings::from_map(&self.raw);
        }
        if touched.intersects(StateKeys::STATS) {
            self.stats = Stats::from_map(&self.raw);
        }
        touched
    }

    /// Apply every pending notification from the attached feed.
    pub fn poll(&mut self) -> StateKeys {
        let pending = match self.subscription {
            Some(ref sub) => sub.drain(),
            None => return StateKeys::empty(),
        };
        pending
            .iter()
            .fold(StateKeys::empty(), |acc, change| acc | self.apply(change))
    }
}
