//! Allow-list Matching
//!
//! Every page load goes through here. A host is allowed when it equals an
//! allow-listed domain or is a subdomain of one; everything else is blocked.

use std::borrow::Cow;

use crate::allowlist::AllowList;
use crate::url::extract_host;

// =============================================================================
// Match Result
// =============================================================================

/// Final decision for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Host is on the allow-list (or a subdomain of an entry)
    Allow,
    /// Host is not allowed
    Block,
}

/// Result of matching a host against the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub decision: Decision,
    /// Index of the allow-list entry that matched
    pub matched: Option<usize>,
}

impl MatchResult {
    const BLOCK: Self = Self {
        decision: Decision::Block,
        matched: None,
    };

    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.decision == Decision::Block
    }
}

// =============================================================================
// Matching
// =============================================================================

/// Check whether `host` is `domain` or one of its subdomains.
///
/// Both sides must already be lowercase. The suffix must start on a label
/// boundary, so `evilexample.com` never matches `example.com`.
#[inline]
pub fn host_matches(host: &str, domain: &str) -> bool {
    if host.len() == domain.len() {
        return host == domain;
    }
    host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

#[inline]
fn lowercase(host: &str) -> Cow<'_, str> {
    if host.chars().any(char::is_uppercase) {
        Cow::Owned(host.to_lowercase())
    } else {
        Cow::Borrowed(host)
    }
}

/// Match a hostname against an allow-list.
pub fn match_host(hostname: &str, allow_list: &AllowList) -> MatchResult {
    let host = lowercase(hostname);
    match allow_list.iter().position(|d| host_matches(&host, d)) {
        Some(idx) => MatchResult {
            decision: Decision::Allow,
            matched: Some(idx),
        },
        None => MatchResult::BLOCK,
    }
}

/// Match a full URL against an allow-list.
///
/// URLs without a usable host fail closed.
pub fn match_url(url: &str, allow_list: &AllowList) -> MatchResult {
    match extract_host(url) {
        Some(host) => match_host(host, allow_list),
        None => {
            log::debug!("no host in {:?}, blocking", url);
            MatchResult::BLOCK
        }
    }
}

/// `true` when the hostname is not covered by the allow-list.
#[inline]
pub fn is_blocked(hostname: &str, allow_list: &AllowList) -> bool {
    match_host(hostname, allow_list).is_blocked()
}

/// `true` when the URL's host is not covered by the allow-list, or when the
/// URL has no host at all.
#[inline]
pub fn is_url_blocked(url: &str, allow_list: &AllowList) -> bool {
    match_url(url, allow_list).is_blocked()
}

// =============================================================================
// Matcher
// =============================================================================

/// Matcher bound to one allow-list.
#[derive(Debug, Clone, Default)]
pub struct DomainMatcher {
    allow_list: AllowList,
}

impl DomainMatcher {
    pub fn new(allow_list: AllowList) -> Self {
        Self { allow_list }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    pub fn check_host(&self, hostname: &str) -> MatchResult {
        match_host(hostname, &self.allow_list)
    }

    pub fn check_url(&self, url: &str) -> MatchResult {
        match_url(url, &self.allow_list)
    }

    /// Entry that allowed `hostname`, if any.
    pub fn matched_entry(&self, hostname: &str) -> Option<&str> {
        self.check_host(hostname)
            .matched
            .map(|idx| self.allow_list[idx].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> AllowList {
        AllowList::new(entries.iter().copied()).unwrap()
    }

    #[test]
    fn test_exact_match() {
        assert!(!is_blocked("mg-passenger.online", &list(&["mg-passenger.online"])));
    }

    #[test]
    fn test_subdomain_match() {
        let allow = list(&["mg-passenger.online"]);
        assert!(!is_blocked("sub.mg-passenger.online", &allow));
        assert!(!is_blocked("a.b.mg-passenger.online", &allow));
    }

    #[test]
    fn test_no_dot_boundary_match() {
        let allow = list(&["mg-passenger.online"]);
        assert!(is_blocked("evilmg-passenger.online", &allow));
        assert!(is_blocked("mg-passenger.online.evil.com", &allow));
        assert!(is_blocked("passenger.online", &allow));
    }

    #[test]
    fn test_empty_list_blocks_everything() {
        let allow = AllowList::empty();
        assert!(is_blocked("example.com", &allow));
        assert!(is_blocked("", &allow));
    }

    #[test]
    fn test_case_insensitive_host() {
        let allow = list(&["google.com"]);
        assert!(!is_blocked("WWW.Google.COM", &allow));
    }

    #[test]
    fn test_malformed_url_fails_closed() {
        let allow = list(&["example.com"]);
        for url in [
            "not a url",
            "",
            "https://",
            "about:blank",
            "http://[::1",
            "example.com",
            "https://example.com:notaport/",
            "https://example.com:99999/",
            "https://example.com:80:80/",
        ] {
            assert!(is_url_blocked(url, &allow), "expected {:?} to be blocked", url);
        }
    }

    #[test]
    fn test_url_matching() {
        let allow = AllowList::default();
        assert!(!is_url_blocked("https://mg-passenger.online/", &allow));
        assert!(!is_url_blocked("https://maps.google.com/search?q=x", &allow));
        assert!(!is_url_blocked("https://user@Docs.Google.com:443/a", &allow));
        assert!(is_url_blocked("https://example.com/google.com", &allow));
        assert!(is_url_blocked("https://google.com.evil.net/", &allow));
    }

    #[test]
    fn test_matched_index() {
        let matcher = DomainMatcher::new(list(&["a.com", "b.com"]));
        assert_eq!(matcher.check_host("x.b.com").matched, Some(1));
        assert_eq!(matcher.matched_entry("a.com"), Some("a.com"));
        assert_eq!(matcher.matched_entry("c.com"), None);
        assert_eq!(matcher.check_url("https://c.com").decision, Decision::Block);
    }

    /// Exhaustive check of the allow rule over a small host/list grid.
    #[test]
    fn test_allow_iff_equal_or_dot_suffix() {
        let labels = ["a", "b", "ab", "com", "b.com", "ab.com"];
        let mut hosts: Vec<String> = Vec::new();
        for x in labels {
            hosts.push(x.to_string());
            for y in labels {
                hosts.push(format!("{}.{}", x, y));
                hosts.push(format!("{}{}", x, y));
            }
        }

        for d1 in labels {
            for d2 in labels {
                let allow = list(&[d1, d2]);
                for h in &hosts {
                    let expected_allowed = allow
                        .iter()
                        .any(|d| h == d || h.ends_with(&format!(".{}", d)));
                    assert_eq!(
                        !is_blocked(h, &allow),
                        expected_allowed,
                        "host={} list={}",
                        h,
                        allow
                    );
                }
            }
        }
    }
}
