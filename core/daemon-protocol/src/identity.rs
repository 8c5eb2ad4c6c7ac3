use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of keys produced when no terminal identifier was available.
pub const UNKNOWN_KEY_PREFIX: &str = "UNKNOWN:";

/// Raw identifiers a producer can observe about the terminal window it runs in.
///
/// Only the first five fields take part in key resolution; the `term*` fields are
/// carried for display and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterm_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kitty_window_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wezterm_pane: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term_program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
}

/// Derives the stable key for the window owning `identity`.
///
/// First non-blank identifier wins: iTerm, Kitty, WezTerm, TTY, then PID.
/// With none present the key is `UNKNOWN:<epoch seconds>`, which never matches
/// a focus hint.
pub fn resolve_key(identity: &TerminalIdentity) -> String {
    resolve_key_at(identity, Utc::now())
}

pub fn resolve_key_at(identity: &TerminalIdentity, now: DateTime<Utc>) -> String {
    let tagged = [
        ("ITERM", identity.iterm_session_id.as_deref()),
        ("KITTY", identity.kitty_window_id.as_deref()),
        ("WEZTERM", identity.wezterm_pane.as_deref()),
        ("TTY", identity.tty.as_deref()),
    ];

    for (tag, value) in tagged {
        if let Some(value) = non_blank(value) {
            return format!("{}:{}", tag, value);
        }
    }

    if let Some(pid) = identity.terminal_pid.filter(|pid| *pid > 0) {
        return format!("PID:{}", pid);
    }

    format!(
        "{}{}.{:06}",
        UNKNOWN_KEY_PREFIX,
        now.timestamp(),
        now.timestamp_subsec_micros()
    )
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn iterm_wins_over_everything() {
        let identity = TerminalIdentity {
            iterm_session_id: Some("X".to_string()),
            kitty_window_id: Some("7".to_string()),
            tty: Some("/dev/ttys0".to_string()),
            terminal_pid: Some(42),
            ..Default::default()
        };
        assert_eq!(resolve_key(&identity), "ITERM:X");
    }

    #[test]
    fn blank_values_fall_through_to_tty() {
        let identity = TerminalIdentity {
            iterm_session_id: Some("".to_string()),
            kitty_window_id: Some("   ".to_string()),
            tty: Some("/dev/ttys0".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_key(&identity), "TTY:/dev/ttys0");
    }

    #[test]
    fn kitty_and_wezterm_keep_their_order() {
        let identity = TerminalIdentity {
            kitty_window_id: Some("3".to_string()),
            wezterm_pane: Some("9".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_key(&identity), "KITTY:3");

        let identity = TerminalIdentity {
            wezterm_pane: Some("9".to_string()),
            terminal_pid: Some(100),
            ..Default::default()
        };
        assert_eq!(resolve_key(&identity), "WEZTERM:9");
    }

    #[test]
    fn pid_used_when_no_window_ids() {
        let identity = TerminalIdentity {
            terminal_pid: Some(4242),
            term_program: Some("Apple_Terminal".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_key(&identity), "PID:4242");
    }

    #[test]
    fn empty_identity_is_unknown_with_timestamp() {
        let now = Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        let key = resolve_key_at(&TerminalIdentity::default(), now);
        assert_eq!(key, "UNKNOWN:1700000000.250000");
        assert!(resolve_key(&TerminalIdentity::default()).starts_with("UNKNOWN:"));
    }

    #[test]
    fn zero_pid_counts_as_absent() {
        let identity = TerminalIdentity {
            terminal_pid: Some(0),
            ..Default::default()
        };
        assert!(resolve_key(&identity).starts_with("UNKNOWN:"));
    }
}
