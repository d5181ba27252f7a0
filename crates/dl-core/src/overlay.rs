//! Page-level Overlay Controller
//!
//! A two-state machine driven by settings events. It never touches the DOM;
//! each transition returns the effects the host must apply (mount the block
//! page, lock scrolling, bump the counter, redirect).

use std::fmt;

use serde::Serialize;

use crate::allowlist::AllowList;
use crate::matcher::is_blocked;
use crate::types::{Settings, StateKeys};
use crate::url::extract_host;

// =============================================================================
// States, Events, Effects
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlayState {
    /// No overlay mounted
    #[default]
    Unblocked,
    /// Overlay mounted, scrolling disabled, shortcuts intercepted
    Blocked,
}

/// Input to the controller.
#[derive(Debug, Clone)]
pub enum Event {
    /// Initial evaluation after the page loads
    Load(Settings),
    /// A storage notification arrived, with the keys it touched
    StorageChanged(Settings, StateKeys),
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Effect {
    MountOverlay(BlockPage),
    DisableScroll,
    IncrementBlockedCount,
    Redirect(String),
    RemoveOverlay,
    RestoreScroll,
}

/// How often entering a blocked page bumps `blockedCount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountPolicy {
    /// Once per `Unblocked -> Blocked` transition
    #[default]
    OncePerTransition,
    /// Every re-check that finds the page blocked, including re-renders
    /// caused by unrelated setting changes. Matches older builds, which
    /// overcount.
    EveryCheck,
}

// =============================================================================
// Block Page
// =============================================================================

/// Link on the block page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockLink {
    pub href: String,
    pub text: String,
}

/// Content of the blocking overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockPage {
    pub title: String,
    pub message: String,
    pub link: Option<BlockLink>,
}

impl BlockPage {
    pub fn for_allow_list(allow_list: &AllowList) -> Self {
        let message = match allow_list.len() {
            0 => "Cette machine n'est autorisée à accéder à aucun site.".to_string(),
            1 => format!(
                "Cette machine n'est pas autorisée à accéder à ce site. \
                 Seuls les sites {} et ses sous-domaines sont autorisés.",
                allow_list[0]
            ),
            _ => format!(
                "Cette machine n'est pas autorisée à accéder à ce site. \
                 Seuls les sites {} et leurs sous-domaines sont autorisés.",
                allow_list.join(", ")
            ),
        };

        Self {
            title: "Website Blocked".to_string(),
            message,
            link: allow_list.primary().map(|domain| BlockLink {
                href: canonical_url(domain),
                text: format!("Go to {}", domain),
            }),
        }
    }
}

/// Redirect target for an allowed domain.
pub fn canonical_url(domain: &str) -> String {
    format!("https://{}", domain)
}

// =============================================================================
// Keyboard Shortcuts
// =============================================================================

/// Shortcuts swallowed on a blocked page (refresh, fullscreen, dev tools,
/// view source, inspect).
pub const BLOCKED_SHORTCUTS: &[&str] = &[
    "F5",
    "F11",
    "F12",
    "Ctrl+R",
    "Ctrl+Shift+R",
    "Ctrl+Shift+I",
    "Ctrl+U",
    "Ctrl+Shift+C",
];

/// A key press with modifiers, written `Ctrl+Shift+Alt+key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub key: String,
}

impl KeyCombo {
    pub fn new(key: &str, ctrl: bool, shift: bool, alt: bool) -> Self {
        Self {
            ctrl,
            shift,
            alt,
            key: normalize_key(key),
        }
    }

    /// Parse `"Ctrl+Shift+R"` style strings. Returns `None` without a key.
    pub fn parse(s: &str) -> Option<Self> {
        let mut combo = Self::new("", false, false, false);
        for part in s.split('+') {
            match part.trim() {
                "Ctrl" | "Control" => combo.ctrl = true,
                "Shift" => combo.shift = true,
                "Alt" => combo.alt = true,
                "" => return None,
                key => combo.key = normalize_key(key),
            }
        }
        if combo.key.is_empty() {
            return None;
        }
        Some(combo)
    }

    pub fn is_blocked_shortcut(&self) -> bool {
        BLOCKED_SHORTCUTS
            .iter()
            .filter_map(|s| Self::parse(s))
            .any(|blocked| blocked == *self)
    }
}

/// Single letters compare case-insensitively (`Ctrl+R` arrives as key "r").
fn normalize_key(key: &str) -> String {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.to_ascii_uppercase().to_string(),
        _ => key.to_string(),
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            f.write_str("Ctrl+")?;
        }
        if self.shift {
            f.write_str("Shift+")?;
        }
        if self.alt {
            f.write_str("Alt+")?;
        }
        f.write_str(&self.key)
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Blocking state machine for one page.
#[derive(Debug, Clone)]
pub struct OverlayController {
    url: String,
    host: Option<String>,
    policy: CountPolicy,
    state: OverlayState,
    page: Option<BlockPage>,
}

impl OverlayController {
    pub fn new(url: &str) -> Self {
        Self::with_policy(url, CountPolicy::default())
    }

    pub fn with_policy(url: &str, policy: CountPolicy) -> Self {
        Self {
            url: url.to_string(),
            host: extract_host(url).map(str::to_lowercase),
            policy,
            state: OverlayState::Unblocked,
            page: None,
        }
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    pub fn policy(&self) -> CountPolicy {
        self.policy
    }

    /// Host of the page, or `None` when the URL has none.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Whether `settings` call for the overlay on this page.
    pub fn should_block(&self, settings: &Settings) -> bool {
        if !settings.enabled {
            return false;
        }
        match self.host {
            Some(ref host) => is_blocked(host, &settings.allowed_domains),
            None => true,
        }
    }

    /// Feed one event and collect the effects to apply.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let (settings, changed, is_load) = match event {
            Event::Load(settings) => (settings, StateKeys::all(), true),
            Event::StorageChanged(settings, changed) => (settings, changed, false),
        };

        // Counter writes come back as notifications; re-checking on them
        // under EveryCheck would count forever.
        if self.policy == CountPolicy::EveryCheck && !changed.intersects(StateKeys::SETTINGS) {
            return Vec::new();
        }

        let want_blocked = self.should_block(&settings);
        let effects = match (self.state, want_blocked) {
            (OverlayState::Unblocked, true) => self.enter_blocked(&settings.allowed_domains, is_load),
            (OverlayState::Blocked, false) => self.leave_blocked(),
            (OverlayState::Blocked, true) => self.recheck_blocked(&settings.allowed_domains),
            (OverlayState::Unblocked, false) => Vec::new(),
        };

        if !effects.is_empty() {
            log::debug!("overlay {:?} on {:?}: {:?}", self.state, self.host, effects);
        }
        effects
    }

    fn enter_blocked(&mut self, allow_list: &AllowList, is_load: bool) -> Vec<Effect> {
        let page = BlockPage::for_allow_list(allow_list);
        self.state = OverlayState::Blocked;
        self.page = Some(page.clone());

        let mut effects = vec![
            Effect::MountOverlay(page),
            Effect::DisableScroll,
            Effect::IncrementBlockedCount,
        ];
        if let Some(target) = self.redirect_target(allow_list, is_load) {
            effects.push(Effect::Redirect(target));
        }
        effects
    }

    fn leave_blocked(&mut self) -> Vec<Effect> {
        self.state = OverlayState::Unblocked;
        self.page = None;
        vec![Effect::RemoveOverlay, Effect::RestoreScroll]
    }

    /// Still blocked after a re-check. Re-mount only when the block page
    /// content changed, unless the legacy policy asks for a full re-render.
    fn recheck_blocked(&mut self, allow_list: &AllowList) -> Vec<Effect> {
        let page = BlockPage::for_allow_list(allow_list);
        match self.policy {
            CountPolicy::EveryCheck => {
                self.page = Some(page.clone());
                vec![
                    Effect::RemoveOverlay,
                    Effect::MountOverlay(page),
                    Effect::DisableScroll,
                    Effect::IncrementBlockedCount,
                ]
            }
            CountPolicy::OncePerTransition if self.page.as_ref() != Some(&page) => {
                self.page = Some(page.clone());
                vec![Effect::RemoveOverlay, Effect::MountOverlay(page)]
            }
            CountPolicy::OncePerTransition => Vec::new(),
        }
    }

    fn redirect_target(&self, allow_list: &AllowList, is_load: bool) -> Option<String> {
        // Older builds only redirected at load; the legacy policy keeps that.
        if self.policy == CountPolicy::EveryCheck && !is_load {
            return None;
        }
        let target = canonical_url(allow_list.primary()?);
        let current = self.url.trim_end_matches('/');
        if current == target {
            None
        } else {
            Some(target)
        }
    }

    /// Whether a key press must be swallowed.
    pub fn suppress_key(&self, combo: &KeyCombo) -> bool {
        self.state == OverlayState::Blocked && combo.is_blocked_shortcut()
    }

    /// Whether the context menu must be swallowed.
    pub fn suppress_context_menu(&self) -> bool {
        self.state == OverlayState::Blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(enabled: bool, domains: &[&str]) -> Settings {
        Settings {
            enabled,
            allowed_domains: AllowList::new(domains.iter().copied()).unwrap(),
            ..Settings::default()
        }
    }

    fn changed(settings: Settings, keys: StateKeys) -> Event {
        Event::StorageChanged(settings, keys)
    }

    fn increments(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| **e == Effect::IncrementBlockedCount)
            .count()
    }

    #[test]
    fn test_blocked_page_on_load() {
        let mut ctl = OverlayController::new("https://example.com/page");
        let effects = ctl.handle(Event::Load(settings(true, &["mg-passenger.online"])));

        assert_eq!(ctl.state(), OverlayState::Blocked);
        assert!(matches!(effects[0], Effect::MountOverlay(_)));
        assert_eq!(effects[1], Effect::DisableScroll);
        assert_eq!(effects[2], Effect::IncrementBlockedCount);
        assert_eq!(effects[3], Effect::Redirect("https://mg-passenger.online".to_string()));
    }

    #[test]
    fn test_allowed_page_stays_unblocked() {
        let mut ctl = OverlayController::new("https://app.mg-passenger.online/");
        assert!(ctl.handle(Event::Load(settings(true, &["mg-passenger.online"]))).is_empty());
        assert_eq!(ctl.state(), OverlayState::Unblocked);
    }

    #[test]
    fn test_disabled_never_blocks() {
        let mut ctl = OverlayController::new("https://example.com/");
        assert!(ctl.handle(Event::Load(settings(false, &[]))).is_empty());
        assert!(!ctl.suppress_context_menu());
    }

    #[test]
    fn test_toggle_off_does_not_recount() {
        let mut ctl = OverlayController::new("https://example.com/");
        let on = settings(true, &["google.com"]);
        let off = settings(false, &["google.com"]);

        let first = ctl.handle(Event::Load(on.clone()));
        assert_eq!(increments(&first), 1);

        let leave = ctl.handle(changed(off, StateKeys::ENABLED));
        assert_eq!(leave, vec![Effect::RemoveOverlay, Effect::RestoreScroll]);
        assert_eq!(ctl.state(), OverlayState::Unblocked);

        let back = ctl.handle(changed(on, StateKeys::ENABLED));
        assert_eq!(increments(&back), 1);
    }

    #[test]
    fn test_rerender_only_counts_once() {
        let mut ctl = OverlayController::new("https://example.com/");
        let on = settings(true, &["google.com"]);
        ctl.handle(Event::Load(on.clone()));

        for keys in [StateKeys::BLOCKED_COUNT, StateKeys::SHOW_NOTIFICATIONS, StateKeys::ENABLED] {
            assert!(ctl.handle(changed(on.clone(), keys)).is_empty());
        }
        assert_eq!(ctl.state(), OverlayState::Blocked);
    }

    #[test]
    fn test_allow_list_change_unblocks() {
        let mut ctl = OverlayController::new("https://example.com/");
        ctl.handle(Event::Load(settings(true, &["google.com"])));

        let effects = ctl.handle(changed(settings(true, &["example.com"]), StateKeys::ALLOWED_DOMAINS));
        assert_eq!(effects, vec![Effect::RemoveOverlay, Effect::RestoreScroll]);
    }

    #[test]
    fn test_allow_list_change_remounts_page() {
        let mut ctl = OverlayController::new("https://example.com/");
        ctl.handle(Event::Load(settings(true, &["google.com"])));

        let effects = ctl.handle(changed(settings(true, &["bing.com"]), StateKeys::ALLOWED_DOMAINS));
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[0], Effect::RemoveOverlay);
        match &effects[1] {
            Effect::MountOverlay(page) => {
                assert_eq!(page.link.as_ref().unwrap().href, "https://bing.com");
            }
            other => panic!("unexpected effect {:?}", other),
        }
        assert_eq!(increments(&effects), 0);
    }

    #[test]
    fn test_every_check_policy_overcounts() {
        let mut ctl = OverlayController::with_policy("https://example.com/", CountPolicy::EveryCheck);
        let on = settings(true, &["google.com"]);

        assert_eq!(increments(&ctl.handle(Event::Load(on.clone()))), 1);
        let again = ctl.handle(changed(on.clone(), StateKeys::ENABLED));
        assert_eq!(increments(&again), 1);
        assert!(!again.iter().any(|e| matches!(e, Effect::Redirect(_))));

        // Counter notifications are not re-checks.
        assert!(ctl.handle(changed(on, StateKeys::BLOCKED_COUNT)).is_empty());
    }

    #[test]
    fn test_malformed_url_blocks() {
        let mut ctl = OverlayController::new("not a url");
        assert_eq!(ctl.host(), None);
        ctl.handle(Event::Load(settings(true, &["google.com"])));
        assert_eq!(ctl.state(), OverlayState::Blocked);
    }

    #[test]
    fn test_empty_allow_list_has_no_redirect() {
        let mut ctl = OverlayController::new("https://example.com/");
        let effects = ctl.handle(Event::Load(settings(true, &[])));
        assert_eq!(increments(&effects), 1);
        assert!(!effects.iter().any(|e| matches!(e, Effect::Redirect(_))));
        match &effects[0] {
            Effect::MountOverlay(page) => assert!(page.link.is_none()),
            other => panic!("unexpected effect {:?}", other),
        }
    }

    #[test]
    fn test_shortcut_suppression_tracks_state() {
        let mut ctl = OverlayController::new("https://example.com/");
        let refresh = KeyCombo::new("r", true, false, false);
        assert!(!ctl.suppress_key(&refresh));

        ctl.handle(Event::Load(settings(true, &["google.com"])));
        assert!(ctl.suppress_key(&refresh));
        assert!(ctl.suppress_key(&KeyCombo::new("F12", false, false, false)));
        assert!(ctl.suppress_key(&KeyCombo::new("I", true, true, false)));
        assert!(!ctl.suppress_key(&KeyCombo::new("c", true, false, false)));
        assert!(ctl.suppress_context_menu());
    }

    #[test]
    fn test_key_combo_parse_display() {
        let combo = KeyCombo::parse("Ctrl+Shift+R").unwrap();
        assert!(combo.ctrl && combo.shift && !combo.alt);
        assert_eq!(combo.to_string(), "Ctrl+Shift+R");
        assert_eq!(KeyCombo::parse("Ctrl+"), None);
        assert_eq!(KeyCombo::parse("Shift"), None);
        assert_eq!(KeyCombo::new("u", true, false, false).to_string(), "Ctrl+U");
    }

    #[test]
    fn test_block_page_message() {
        let page = BlockPage::for_allow_list(&AllowList::new(["mg-passenger.online"]).unwrap());
        assert_eq!(page.title, "Website Blocked");
        assert!(page.message.contains("mg-passenger.online et ses sous-domaines"));
        assert_eq!(page.link.unwrap().text, "Go to mg-passenger.online");
    }
}
