//! WebAssembly bindings for DomainLock
//!
//! The extension's JS contexts own the browser APIs (storage, messaging,
//! DOM). They hand storage snapshots and change payloads to these bindings
//! and apply whatever writes or effects come back.

use std::sync::OnceLock;

use serde_json::{Map, Value};
use wasm_bindgen::prelude::*;

use dl_core::{
    overlay::{CountPolicy, Event, KeyCombo, OverlayController as Controller, OverlayState},
    store::{KeyValueStore, MemoryStore, StorageChange, StorageMap},
    AllowList, Background, InstallReason, SettingsPatch, StateCache, StateSync,
};

static LOGGING: OnceLock<()> = OnceLock::new();

#[wasm_bindgen]
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        console_error_panic_hook::set_once();
        wasm_logger::init(wasm_logger::Config::new(log::Level::Debug));
    });
}

// =============================================================================
// JSON bridging
// =============================================================================

fn from_js(value: &JsValue) -> Result<Value, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(Value::Null);
    }
    let text: String = js_sys::JSON::stringify(value)?.into();
    serde_json::from_str(&text).map_err(|e| JsValue::from_str(&format!("Invalid value: {}", e)))
}

fn to_js<T: serde::Serialize>(value: &T) -> Result<JsValue, JsValue> {
    let text = serde_json::to_string(value)
        .map_err(|e| JsValue::from_str(&format!("Failed to serialize: {}", e)))?;
    js_sys::JSON::parse(&text)
}

fn storage_map(value: &JsValue) -> Result<StorageMap, JsValue> {
    match from_js(value)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(JsValue::from_str("Storage snapshot must be an object")),
    }
}

fn allow_list(domains: &JsValue) -> Result<AllowList, JsValue> {
    AllowList::from_value(&from_js(domains)?).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Run `op` against a throwaway store seeded with `storage` and collect the
/// keys it wrote, so the caller can commit them with `storage.local.set`.
fn with_snapshot<T>(
    storage: &JsValue,
    op: impl FnOnce(&MemoryStore) -> T,
) -> Result<(T, StorageMap), JsValue> {
    let store = MemoryStore::from_map(storage_map(storage)?);
    let feed = store.subscribe();
    let out = op(&store);

    let mut writes = StorageMap::new();
    for change in feed.drain() {
        for (key, value) in change.changes {
            if let Some(new_value) = value.new_value {
                writes.insert(key, new_value);
            }
        }
    }
    Ok((out, writes))
}

// =============================================================================
// Matching
// =============================================================================

#[wasm_bindgen]
pub fn is_blocked(host: &str, domains: JsValue) -> Result<bool, JsValue> {
    Ok(dl_core::is_blocked(host, &allow_list(&domains)?))
}

#[wasm_bindgen]
pub fn is_url_blocked(url: &str, domains: JsValue) -> Result<bool, JsValue> {
    Ok(dl_core::is_url_blocked(url, &allow_list(&domains)?))
}

/// Validate options-page input and return the normalized array.
#[wasm_bindgen]
pub fn normalize_allow_list(input: JsValue) -> Result<JsValue, JsValue> {
    to_js(&allow_list(&input)?)
}

#[wasm_bindgen]
pub fn extract_host_js(url: &str) -> Option<String> {
    dl_core::url::extract_host(url).map(|h| h.to_string())
}

// =============================================================================
// Settings and Stats
// =============================================================================

#[wasm_bindgen]
pub fn settings_from_storage(storage: JsValue) -> Result<JsValue, JsValue> {
    let map = storage_map(&storage)?;
    to_js(&dl_core::Settings::from_map(&map))
}

#[wasm_bindgen]
pub fn stats_from_storage(storage: JsValue) -> Result<JsValue, JsValue> {
    let map = storage_map(&storage)?;
    to_js(&dl_core::Stats::from_map(&map))
}

/// Entries to write on the runtime's installed event.
#[wasm_bindgen]
pub fn on_installed(reason: &str, storage: JsValue) -> Result<JsValue, JsValue> {
    let (result, writes) = with_snapshot(&storage, |store| {
        StateSync::new(store).install(InstallReason::from_str(reason))
    })?;
    result.map_err(|e| JsValue::from_str(&e.to_string()))?;
    to_js(&writes)
}

/// Entries to write for an `incrementBlockedCount` effect.
#[wasm_bindgen]
pub fn increment_blocked_count(storage: JsValue) -> Result<JsValue, JsValue> {
    let (result, writes) = with_snapshot(&storage, |store| {
        StateSync::new(store).increment_blocked_count()
    })?;
    result.map_err(|e| JsValue::from_str(&e.to_string()))?;
    to_js(&writes)
}

/// Entries for a fresh install.
#[wasm_bindgen]
pub fn default_storage() -> Result<JsValue, JsValue> {
    on_installed("install", JsValue::NULL)
}

/// Entries written by "reset to defaults".
#[wasm_bindgen]
pub fn default_settings() -> Result<JsValue, JsValue> {
    to_js(&SettingsPatch::defaults().to_map())
}

// =============================================================================
// Background Messaging
// =============================================================================

/// Answer a popup/options message against the current storage snapshot.
///
/// Returns `{response, set}`. `response` is `null` for unknown actions; `set`
/// holds the entries to commit before replying.
#[wasm_bindgen]
pub fn handle_message(request: JsValue, storage: JsValue) -> Result<JsValue, JsValue> {
    let message = from_js(&request)?;
    let (response, writes) =
        with_snapshot(&storage, |store| Background::new(store).handle_json(&message))?;

    let mut out = Map::new();
    out.insert("response".to_string(), response.unwrap_or(Value::Null));
    out.insert("set".to_string(), Value::Object(writes));
    to_js(&out)
}

// =============================================================================
// Overlay Controller
// =============================================================================

/// Content-script controller. Each method returns an array of effects:
/// `{type: "mountOverlay", value: {title, message, link}}`, `{type:
/// "disableScroll"}`, `{type: "incrementBlockedCount"}`, `{type: "redirect",
/// value: url}`, `{type: "removeOverlay"}`, `{type: "restoreScroll"}`.
#[wasm_bindgen]
pub struct OverlayController {
    inner: Controller,
    cache: StateCache,
}

#[wasm_bindgen]
impl OverlayController {
    /// `legacy_count` re-counts on every re-check, like older builds.
    #[wasm_bindgen(constructor)]
    pub fn new(url: &str, legacy_count: bool) -> OverlayController {
        let policy = if legacy_count {
            CountPolicy::EveryCheck
        } else {
            CountPolicy::OncePerTransition
        };
        OverlayController {
            inner: Controller::with_policy(url, policy),
            cache: StateCache::detached(StorageMap::new()),
        }
    }

    /// Initial evaluation from a full storage snapshot.
    pub fn load(&mut self, storage: JsValue) -> Result<JsValue, JsValue> {
        self.cache = StateCache::detached(storage_map(&storage)?);
        let effects = self.inner.handle(Event::Load(self.cache.settings().clone()));
        to_js(&effects)
    }

    /// Re-evaluate after a `storage.onChanged` notification.
    pub fn storage_changed(&mut self, changes: JsValue, area: &str) -> Result<JsValue, JsValue> {
        let payload = from_js(&changes)?;
        let change = match StorageChange::from_wire(area, &payload) {
            Some(change) => change,
            None => return to_js(&Vec::<Value>::new()),
        };

        let changed = self.cache.apply(&change);
        if changed.is_empty() {
            return to_js(&Vec::<Value>::new());
        }
        let effects = self
            .inner
            .handle(Event::StorageChanged(self.cache.settings().clone(), changed));
        to_js(&effects)
    }

    pub fn is_blocked_state(&self) -> bool {
        self.inner.state() == OverlayState::Blocked
    }

    pub fn host(&self) -> Option<String> {
        self.inner.host().map(|h| h.to_string())
    }

    pub fn suppress_key(&self, key: &str, ctrl: bool, shift: bool, alt: bool) -> bool {
        self.inner.suppress_key(&KeyCombo::new(key, ctrl, shift, alt))
    }

    pub fn suppress_context_menu(&self) -> bool {
        self.inner.suppress_context_menu()
    }
}
