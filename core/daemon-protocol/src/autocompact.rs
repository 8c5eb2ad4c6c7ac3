//! Auto-compact state of the assistant, read from its `settings.json`.
//!
//! The hook reports it at session start and the daemon flips it on request;
//! both derive the reported status here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key in the assistant's `settings.json`. Absent means enabled.
pub const AUTOCOMPACT_SETTINGS_KEY: &str = "autoCompact";
/// Environment variable overriding the compaction threshold percentage.
pub const AUTOCOMPACT_THRESHOLD_ENV: &str = "CLAUDE_AUTOCOMPACT_PCT_OVERRIDE";
pub const DEFAULT_AUTOCOMPACT_THRESHOLD: u32 = 95;
/// Compaction still fires around this usage when auto-compact is off.
pub const AUTOCOMPACT_BUG_THRESHOLD: u32 = 78;
pub const AUTOCOMPACT_BUG_WARNING: &str = "Known bug: may still trigger at ~78%";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoCompactStatus {
    pub enabled: bool,
    pub threshold: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bug_threshold: Option<u32>,
}

impl AutoCompactStatus {
    pub fn new(enabled: bool, threshold_override: Option<&str>) -> Self {
        Self {
            enabled,
            threshold: parse_threshold(threshold_override),
            bug_threshold: (!enabled).then_some(AUTOCOMPACT_BUG_THRESHOLD),
        }
    }

    /// Status for a parsed settings document; anything unexpected counts as enabled.
    pub fn from_settings(settings: &Value, threshold_override: Option<&str>) -> Self {
        Self::new(autocompact_enabled(settings), threshold_override)
    }

    pub fn warning(&self) -> Option<&'static str> {
        (!self.enabled).then_some(AUTOCOMPACT_BUG_WARNING)
    }
}

pub fn autocompact_enabled(settings: &Value) -> bool {
    settings
        .get(AUTOCOMPACT_SETTINGS_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

/// Threshold percentage from an override value; anything outside 1..=100 is ignored.
pub fn parse_threshold(value: Option<&str>) -> u32 {
    value
        .and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|value| (1..=100).contains(value))
        .unwrap_or(DEFAULT_AUTOCOMPACT_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn threshold_override_must_be_a_percentage() {
        assert_eq!(parse_threshold(None), 95);
        assert_eq!(parse_threshold(Some(" 70 ")), 70);
        assert_eq!(parse_threshold(Some("100")), 100);
        assert_eq!(parse_threshold(Some("0")), 95);
        assert_eq!(parse_threshold(Some("500")), 95);
        assert_eq!(parse_threshold(Some("lots")), 95);
    }

    #[test]
    fn disabled_status_carries_bug_threshold_and_warning() {
        let status = AutoCompactStatus::from_settings(&json!({"autoCompact": false}), Some("80"));
        assert!(!status.enabled);
        assert_eq!(status.threshold, 80);
        assert_eq!(status.bug_threshold, Some(78));
        assert_eq!(status.warning(), Some("Known bug: may still trigger at ~78%"));
    }

    #[test]
    fn missing_or_odd_key_means_enabled() {
        assert!(autocompact_enabled(&json!({"theme": "dark"})));
        assert!(autocompact_enabled(&json!({"autoCompact": "no"})));
        assert!(autocompact_enabled(&json!([])));
        let status = AutoCompactStatus::new(true, None);
        assert_eq!(status.bug_threshold, None);
        assert_eq!(status.warning(), None);
    }
}
