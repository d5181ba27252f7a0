use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use dl_core::{AllowList, Settings, Stats};

pub const EXTENSION_NAME: &str = "domainlock";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStatistics {
    pub blocked_count: u64,
    pub last_reset: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSettings {
    pub allowed_domain: AllowList,
    pub show_notifications: bool,
    pub block_keyboard_shortcuts: bool,
    pub block_context_menu: bool,
}

/// Statistics export written by the options page "Export" button.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub timestamp: String,
    pub extension: &'static str,
    pub version: &'static str,
    pub statistics: ExportStatistics,
    pub settings: ExportSettings,
}

pub fn build_report(settings: &Settings, stats: &Stats, now: DateTime<Utc>) -> ExportReport {
    ExportReport {
        timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        extension: EXTENSION_NAME,
        version: env!("CARGO_PKG_VERSION"),
        statistics: ExportStatistics {
            blocked_count: stats.blocked_count,
            last_reset: stats.last_reset.to_string(),
            enabled: settings.enabled,
        },
        settings: ExportSettings {
            allowed_domain: settings.allowed_domains.clone(),
            show_notifications: settings.show_notifications,
            block_keyboard_shortcuts: settings.block_keyboard_shortcuts,
            block_context_menu: settings.block_context_menu,
        },
    }
}

pub fn default_file_name(now: DateTime<Utc>) -> String {
    format!("website-blocker-stats-{}.json", now.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_report_shape() {
        let now = Utc.with_ymd_and_hms(2024, 6, 9, 10, 0, 0).unwrap();
        let stats = Stats {
            blocked_count: 12,
            ..Stats::default()
        };
        let report = serde_json::to_value(build_report(&Settings::default(), &stats, now)).unwrap();

        assert_eq!(report["timestamp"], json!("2024-06-09T10:00:00.000Z"));
        assert_eq!(report["extension"], json!("domainlock"));
        assert_eq!(
            report["statistics"],
            json!({ "blockedCount": 12, "lastReset": "Never", "enabled": true })
        );
        assert_eq!(
            report["settings"],
            json!({
                "allowedDomain": ["mg-passenger.online", "google.com"],
                "showNotifications": true,
                "blockKeyboardShortcuts": true,
                "blockContextMenu": true,
            })
        );
    }

    #[test]
    fn test_default_file_name() {
        let now = Utc.with_ymd_and_hms(2024, 6, 9, 23, 59, 0).unwrap();
        assert_eq!(default_file_name(now), "website-blocker-stats-2024-06-09.json");
    }
}
