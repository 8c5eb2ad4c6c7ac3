use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AutoCompactStatus, TerminalIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Working,
    Idle,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextMetrics {
    pub used_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_output_tokens: Option<u64>,
    #[serde(default)]
    pub is_estimate: bool,
}

/// Model reported by a producer: either a bare id or the status-line object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelInfo {
    Name(String),
    Detailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },
}

/// One tracked assistant session as viewers see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub terminal_key: String,
    pub status: SessionStatus,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub last_focus_hint_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub context_metrics: Option<ContextMetrics>,
    #[serde(default)]
    pub session_title: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub project_dir: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub model: Option<ModelInfo>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub git_worktree: Option<String>,
    #[serde(default)]
    pub autocompact: Option<AutoCompactStatus>,
    #[serde(default)]
    pub last_tool_name: Option<String>,
    #[serde(default)]
    pub terminal: Option<TerminalIdentity>,
}

impl Session {
    /// Bare session with no descriptors, as created by the first event seen for `session_id`.
    pub fn new(session_id: &str, terminal_key: String, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            terminal_key,
            status: SessionStatus::Active,
            last_activity: now,
            last_focus_hint_at: None,
            registered_at: now,
            context_metrics: None,
            session_title: None,
            cwd: None,
            project: None,
            project_dir: None,
            transcript_path: None,
            model: None,
            source: None,
            git_branch: None,
            git_worktree: None,
            autocompact: None,
            last_tool_name: None,
            terminal: None,
        }
    }

    /// Latest of typing activity and window focus; drives focus resolution.
    pub fn focus_priority(&self) -> DateTime<Utc> {
        match self.last_focus_hint_at {
            Some(hint) if hint > self.last_activity => hint,
            _ => self.last_activity,
        }
    }

    pub fn is_auto_registered(&self) -> bool {
        self.terminal_key.starts_with(crate::AUTO_KEY_PREFIX)
    }
}
