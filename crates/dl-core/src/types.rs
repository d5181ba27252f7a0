//! Core type definitions for DomainLock
//!
//! These types map directly to the persisted key-value layout shared by
//! every extension context.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::allowlist::AllowList;

// =============================================================================
// Persisted Keys
// =============================================================================

/// Storage key names. These are part of the on-disk format.
pub mod keys {
    pub const ENABLED: &str = "enabled";
    pub const ALLOWED_DOMAIN: &str = "allowedDomain";
    pub const BLOCKED_COUNT: &str = "blockedCount";
    pub const LAST_RESET: &str = "lastReset";
    pub const SHOW_NOTIFICATIONS: &str = "showNotifications";
    pub const BLOCK_KEYBOARD_SHORTCUTS: &str = "blockKeyboardShortcuts";
    pub const BLOCK_CONTEXT_MENU: &str = "blockContextMenu";

    /// Keys read by `Settings::from_map`.
    pub const SETTINGS: &[&str] = &[
        ENABLED,
        ALLOWED_DOMAIN,
        SHOW_NOTIFICATIONS,
        BLOCK_KEYBOARD_SHORTCUTS,
        BLOCK_CONTEXT_MENU,
    ];

    /// Keys read by `Stats::from_map`.
    pub const STATS: &[&str] = &[BLOCKED_COUNT, LAST_RESET];
}

// =============================================================================
// Key Sets (bit flags naming which persisted keys changed)
// =============================================================================

bitflags::bitflags! {
    /// Set of persisted keys.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StateKeys: u8 {
        const ENABLED = 1 << 0;
        const ALLOWED_DOMAINS = 1 << 1;
        const BLOCKED_COUNT = 1 << 2;
        const LAST_RESET = 1 << 3;
        const SHOW_NOTIFICATIONS = 1 << 4;
        const BLOCK_KEYBOARD_SHORTCUTS = 1 << 5;
        const BLOCK_CONTEXT_MENU = 1 << 6;

        /// Keys that feed the blocking decision
        const BLOCKING = Self::ENABLED.bits() | Self::ALLOWED_DOMAINS.bits();
        /// All settings keys
        const SETTINGS = Self::BLOCKING.bits()
            | Self::SHOW_NOTIFICATIONS.bits()
            | Self::BLOCK_KEYBOARD_SHORTCUTS.bits()
            | Self::BLOCK_CONTEXT_MENU.bits();
        /// All statistics keys
        const STATS = Self::BLOCKED_COUNT.bits() | Self::LAST_RESET.bits();
    }
}

impl StateKeys {
    /// Map a storage key name to its flag. Unknown keys map to `None`.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            keys::ENABLED => Some(Self::ENABLED),
            keys::ALLOWED_DOMAIN => Some(Self::ALLOWED_DOMAINS),
            keys::BLOCKED_COUNT => Some(Self::BLOCKED_COUNT),
            keys::LAST_RESET => Some(Self::LAST_RESET),
            keys::SHOW_NOTIFICATIONS => Some(Self::SHOW_NOTIFICATIONS),
            keys::BLOCK_KEYBOARD_SHORTCUTS => Some(Self::BLOCK_KEYBOARD_SHORTCUTS),
            keys::BLOCK_CONTEXT_MENU => Some(Self::BLOCK_CONTEXT_MENU),
            _ => None,
        }
    }

    /// Collect flags for a sequence of key names, ignoring unknown keys.
    pub fn from_keys<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .filter_map(Self::from_key)
            .fold(Self::empty(), |acc, k| acc | k)
    }
}

// =============================================================================
// Value Readers
// =============================================================================

/// Read a flag with "not equal to false" semantics.
///
/// Missing keys and non-boolean values read as `true`, so a context that
/// starts before the installer has written defaults still blocks.
#[inline]
pub fn read_flag(map: &Map<String, Value>, key: &str) -> bool {
    !matches!(map.get(key), Some(Value::Bool(false)))
}

/// Read a non-negative counter. Missing or malformed values read as zero.
pub fn read_count(map: &Map<String, Value>, key: &str) -> u64 {
    let value = match map.get(key) {
        Some(value) => value,
        None => return 0,
    };
    value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        })
        .unwrap_or(0)
}

// =============================================================================
// Settings
// =============================================================================

/// User-facing settings read from the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub enabled: bool,
    #[serde(rename = "allowedDomain")]
    pub allowed_domains: AllowList,
    pub show_notifications: bool,
    pub block_keyboard_shortcuts: bool,
    pub block_context_menu: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_domains: AllowList::default(),
            show_notifications: true,
            block_keyboard_shortcuts: true,
            block_context_menu: true,
        }
    }
}

impl Settings {
    /// Build settings from raw storage values.
    ///
    /// An absent or unusable `allowedDomain` falls back to the default list.
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let allowed_domains = match map.get(keys::ALLOWED_DOMAIN) {
            Some(value) => AllowList::from_value(value).unwrap_or_else(|e| {
                log::warn!("ignoring stored allow-list: {}", e);
                AllowList::default()
            }),
            None => AllowList::default(),
        };

        Self {
            enabled: read_flag(map, keys::ENABLED),
            allowed_domains,
            show_notifications: read_flag(map, keys::SHOW_NOTIFICATIONS),
            block_keyboard_shortcuts: read_flag(map, keys::BLOCK_KEYBOARD_SHORTCUTS),
            block_context_menu: read_flag(map, keys::BLOCK_CONTEXT_MENU),
        }
    }
}

/// Partial settings update. `None` fields are left untouched in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub enabled: Option<bool>,
    pub allowed_domains: Option<AllowList>,
    pub show_notifications: Option<bool>,
    pub block_keyboard_shortcuts: Option<bool>,
    pub block_context_menu: Option<bool>,
}

impl SettingsPatch {
    /// Patch that writes every settings key with its default value.
    pub fn defaults() -> Self {
        let d = Settings::default();
        Self {
            enabled: Some(d.enabled),
            allowed_domains: Some(d.allowed_domains),
            show_notifications: Some(d.show_notifications),
            block_keyboard_shortcuts: Some(d.block_keyboard_shortcuts),
            block_context_menu: Some(d.block_context_menu),
        }
    }

    /// Patch that only flips `enabled`.
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Keys this patch will write.
    pub fn keys(&self) -> StateKeys {
        let mut out = StateKeys::empty();
        out.set(StateKeys::ENABLED, self.enabled.is_some());
        out.set(StateKeys::ALLOWED_DOMAINS, self.allowed_domains.is_some());
        out.set(StateKeys::SHOW_NOTIFICATIONS, self.show_notifications.is_some());
        out.set(StateKeys::BLOCK_KEYBOARD_SHORTCUTS, self.block_keyboard_shortcuts.is_some());
        out.set(StateKeys::BLOCK_CONTEXT_MENU, self.block_context_menu.is_some());
        out
    }

    /// Raw storage entries for this patch.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(enabled) = self.enabled {
            map.insert(keys::ENABLED.to_string(), Value::Bool(enabled));
        }
        if let Some(ref list) = self.allowed_domains {
            map.insert(keys::ALLOWED_DOMAIN.to_string(), list.to_value());
        }
        if let Some(flag) = self.show_notifications {
            map.insert(keys::SHOW_NOTIFICATIONS.to_string(), Value::Bool(flag));
        }
        if let Some(flag) = self.block_keyboard_shortcuts {
            map.insert(keys::BLOCK_KEYBOARD_SHORTCUTS.to_string(), Value::Bool(flag));
        }
        if let Some(flag) = self.block_context_menu {
            map.insert(keys::BLOCK_CONTEXT_MENU.to_string(), Value::Bool(flag));
        }
        map
    }
}

// =============================================================================
// Stats
// =============================================================================

/// When statistics were last reset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LastReset {
    #[default]
    Never,
    At(DateTime<Utc>),
    /// A stored value that is not RFC 3339 (older builds wrote locale strings)
    Label(String),
}

impl LastReset {
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(s)) if !s.is_empty() && s != "Never" => {
                match DateTime::parse_from_rfc3339(s) {
                    Ok(ts) => Self::At(ts.with_timezone(&Utc)),
                    Err(_) => Self::Label(s.clone()),
                }
            }
            _ => Self::Never,
        }
    }

    /// Storage representation. `Never` is stored as JSON null.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Never => Value::Null,
            other => Value::String(other.to_string()),
        }
    }
}

impl fmt::Display for LastReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::At(ts) => f.write_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::Label(s) => f.write_str(s),
        }
    }
}

impl Serialize for LastReset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Block statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub blocked_count: u64,
    pub last_reset: LastReset,
}

impl Stats {
    pub fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            blocked_count: read_count(map, keys::BLOCKED_COUNT),
            last_reset: LastReset::from_value(map.get(keys::LAST_RESET)),
        }
    }
}
