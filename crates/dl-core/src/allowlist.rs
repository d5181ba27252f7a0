//! Allow-list of domains exempted from blocking
//!
//! Entries are stored normalized (lowercase, no leading dot, non-empty) so the
//! matcher can compare bytes directly.

use std::fmt;
use std::ops::Deref;

use serde::{Serialize, Serializer};
use serde_json::Value;

/// Domains allowed on a fresh install.
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &["mg-passenger.online", "google.com"];

/// Error type for allow-list construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllowListError {
    #[error("Invalid domain: {0:?}")]
    InvalidDomain(String),
    #[error("Allow-list must be a string or an array of strings")]
    InvalidShape,
    #[error("Please enter a valid domain")]
    Empty,
}

/// Ordered list of normalized allowed domains.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AllowList {
    domains: Vec<String>,
}

impl Default for AllowList {
    fn default() -> Self {
        Self {
            domains: DEFAULT_ALLOWED_DOMAINS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl AllowList {
    /// An allow-list with no entries. Blocks every host.
    pub fn empty() -> Self {
        Self { domains: Vec::new() }
    }

    /// Build from raw entries, normalizing each one.
    ///
    /// Blank entries are skipped and duplicates keep their first position.
    pub fn new<I, S>(entries: I) -> Result<Self, AllowListError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut domains: Vec<String> = Vec::new();
        for entry in entries {
            let raw = entry.as_ref();
            if raw.trim().is_empty() {
                continue;
            }
            let domain = normalize_domain(raw)?;
            if !domains.contains(&domain) {
                domains.push(domain);
            }
        }
        Ok(Self { domains })
    }

    /// Parse user input from the options page.
    ///
    /// Accepts one or more domains separated by commas or whitespace. Input
    /// with no domains at all is rejected.
    pub fn parse(text: &str) -> Result<Self, AllowListError> {
        let list = Self::new(text.split(|c: char| c == ',' || c.is_whitespace()))?;
        if list.is_empty() {
            return Err(AllowListError::Empty);
        }
        Ok(list)
    }

    /// Parse the persisted `allowedDomain` value (string or array of strings).
    pub fn from_value(value: &Value) -> Result<Self, AllowListError> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Array(items) => {
                let strings = items
                    .iter()
                    .map(|item| item.as_str().ok_or(AllowListError::InvalidShape))
                    .collect::<Result<Vec<_>, _>>()?;
                Self::new(strings)
            }
            _ => Err(AllowListError::InvalidShape),
        }
    }

    /// Persisted representation: always an array.
    pub fn to_value(&self) -> Value {
        Value::Array(self.domains.iter().cloned().map(Value::String).collect())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.domains
    }

    /// First entry, used as the canonical redirect target.
    pub fn primary(&self) -> Option<&str> {
        self.domains.first().map(String::as_str)
    }
}

impl Deref for AllowList {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.domains
    }
}

impl fmt::Display for AllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.domains.join(", "))
    }
}

impl Serialize for AllowList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.domains.serialize(serializer)
    }
}

/// Normalize a single domain entry.
///
/// Lowercases, trims whitespace, strips leading dots and a single trailing
/// dot. Rejects anything that looks like a URL rather than a hostname.
pub fn normalize_domain(raw: &str) -> Result<String, AllowListError> {
    let trimmed = raw.trim();
    let stripped = trimmed.trim_start_matches('.');
    let stripped = stripped.strip_suffix('.').unwrap_or(stripped);

    if stripped.is_empty() {
        return Err(AllowListError::InvalidDomain(raw.to_string()));
    }

    let invalid = stripped.bytes().any(|b| {
        b.is_ascii_whitespace() || b.is_ascii_control() || matches!(b, b'/' | b':' | b'@' | b'?' | b'#')
    });
    if invalid || stripped.contains("..") {
        return Err(AllowListError::InvalidDomain(raw.to_string()));
    }

    Ok(stripped.to_lowercase())
}
