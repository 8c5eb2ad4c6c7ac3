//! Wire types and validation for the jacques daemon.
//!
//! This crate is shared by the daemon, the hook producers and viewer clients
//! to prevent schema drift. The daemon remains the authority on validation,
//! but producers reuse the same types to construct events that decode cleanly.
//!
//! Ingestion is newline-delimited JSON: one [`EventEnvelope`] per line, with an
//! `event` discriminator. Viewers speak [`ServerMessage`] / [`ClientMessage`]
//! with a `type` discriminator.

mod autocompact;
mod identity;
mod messages;
mod session;

pub use autocompact::{
    autocompact_enabled, parse_threshold, AutoCompactStatus, AUTOCOMPACT_BUG_THRESHOLD,
    AUTOCOMPACT_BUG_WARNING, AUTOCOMPACT_SETTINGS_KEY, AUTOCOMPACT_THRESHOLD_ENV,
    DEFAULT_AUTOCOMPACT_THRESHOLD,
};
pub use identity::{resolve_key, resolve_key_at, TerminalIdentity, UNKNOWN_KEY_PREFIX};
pub use messages::{ClientMessage, ServerMessage};
pub use session::{ContextMetrics, ModelInfo, Session, SessionStatus};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAX_LINE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_SESSION_ID_LEN: usize = 256;

pub const DATA_DIR_NAME: &str = ".jacques";
pub const SOCKET_NAME: &str = "daemon.sock";
pub const SOCKET_ENV: &str = "JACQUES_SOCKET";
pub const PENDING_EVENTS_FILE: &str = "pending-events.jsonl";

/// Prefix of the placeholder terminal key given to auto-registered sessions.
pub const AUTO_KEY_PREFIX: &str = "AUTO:";

/// Event kinds understood by this protocol version. Anything else is ignored.
pub const EVENT_KINDS: [&str; 6] = [
    "session_start",
    "activity",
    "context_update",
    "idle",
    "session_end",
    "focus_hint",
];

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("line is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("line is not a JSON object")]
    NotAnObject,

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("{field} is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("event payload does not match schema: {0}")]
    Schema(#[source] serde_json::Error),
}

impl DecodeError {
    pub fn code(&self) -> &'static str {
        match self {
            DecodeError::InvalidJson(_) => "invalid_json",
            DecodeError::NotAnObject => "not_an_object",
            DecodeError::MissingField(_) => "missing_field",
            DecodeError::InvalidField { .. } => "invalid_field",
            DecodeError::Schema(_) => "invalid_params",
        }
    }
}

/// Producer-supplied event time: epoch seconds or an RFC3339 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTimestamp {
    Epoch(f64),
    Rfc3339(String),
}

impl EventTimestamp {
    pub fn now() -> Self {
        EventTimestamp::Rfc3339(Utc::now().to_rfc3339())
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            EventTimestamp::Epoch(secs) => {
                if !secs.is_finite() || *secs < 0.0 {
                    return None;
                }
                let whole = secs.trunc() as i64;
                let nanos = ((secs - secs.trunc()) * 1_000_000_000.0) as u32;
                Utc.timestamp_opt(whole, nanos).single()
            }
            EventTimestamp::Rfc3339(value) => DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// One decoded ingestion line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: IngestEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<EventTimestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngestEvent {
    SessionStart(SessionStart),
    Activity(Activity),
    ContextUpdate(ContextUpdate),
    Idle(SessionRef),
    SessionEnd(SessionRef),
    FocusHint(FocusHint),
}

impl IngestEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestEvent::SessionStart(_) => "session_start",
            IngestEvent::Activity(_) => "activity",
            IngestEvent::ContextUpdate(_) => "context_update",
            IngestEvent::Idle(_) => "idle",
            IngestEvent::SessionEnd(_) => "session_end",
            IngestEvent::FocusHint(_) => "focus_hint",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            IngestEvent::SessionStart(start) => Some(&start.session_id),
            IngestEvent::Activity(activity) => Some(&activity.session_id),
            IngestEvent::ContextUpdate(update) => Some(&update.session_id),
            IngestEvent::Idle(target) | IngestEvent::SessionEnd(target) => {
                Some(&target.session_id)
            }
            IngestEvent::FocusHint(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStart {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalIdentity>,
    /// Key already resolved by the producer. Used only when no identity bag is sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_worktree: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autocompact: Option<AutoCompactStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Working,
    Active,
}

impl From<ActivityStatus> for SessionStatus {
    fn from(status: ActivityStatus) -> Self {
        match status {
            ActivityStatus::Working => SessionStatus::Working,
            ActivityStatus::Active => SessionStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActivityStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    pub session_id: String,
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelInfo>,
}

impl ContextUpdate {
    pub fn metrics(&self) -> ContextMetrics {
        ContextMetrics {
            used_percentage: self.used_percentage,
            remaining_percentage: self.remaining_percentage,
            context_window_size: self.context_window_size,
            total_input_tokens: self.total_input_tokens,
            total_output_tokens: self.total_output_tokens,
            is_estimate: self.is_estimate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusHint {
    pub terminal_key: String,
}

impl EventEnvelope {
    pub fn new(event: IngestEvent) -> Self {
        Self {
            event,
            timestamp: Some(EventTimestamp::now()),
        }
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if let Some(timestamp) = &self.timestamp {
            if timestamp.to_datetime().is_none() {
                return Err(DecodeError::InvalidField {
                    field: "timestamp",
                    reason: "must be RFC3339 or epoch seconds".to_string(),
                });
            }
        }

        match &self.event {
            IngestEvent::FocusHint(hint) => require_string(&hint.terminal_key, "terminal_key"),
            IngestEvent::ContextUpdate(update) => {
                require_session_id(&update.session_id)?;
                require_percentage(update.used_percentage, "used_percentage")?;
                if let Some(remaining) = update.remaining_percentage {
                    require_percentage(remaining, "remaining_percentage")?;
                }
                Ok(())
            }
            event => match event.session_id() {
                Some(session_id) => require_session_id(session_id),
                None => Err(DecodeError::MissingField("session_id")),
            },
        }
    }

    /// Recorded producer time, if the line carried a valid one.
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_ref().and_then(EventTimestamp::to_datetime)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(EventEnvelope),
    /// Well-formed line with an `event` kind this version does not know.
    Ignored { kind: String },
}

/// Decodes one ingestion line (without its trailing newline).
pub fn decode_line(line: &[u8]) -> Result<Decoded, DecodeError> {
    let value: Value = serde_json::from_slice(line).map_err(DecodeError::InvalidJson)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }

    let kind = match value.get("event") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => {
            return Err(DecodeError::InvalidField {
                field: "event",
                reason: "must be a string".to_string(),
            })
        }
        None => return Err(DecodeError::MissingField("event")),
    };

    if !EVENT_KINDS.contains(&kind.as_str()) {
        return Ok(Decoded::Ignored { kind });
    }

    let envelope: EventEnvelope = serde_json::from_value(value).map_err(DecodeError::Schema)?;
    envelope.validate()?;
    Ok(Decoded::Event(envelope))
}

/// Serializes an envelope as one newline-terminated ingestion line.
pub fn encode_line(envelope: &EventEnvelope) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(envelope)?;
    line.push(b'\n');
    Ok(line)
}

fn require_session_id(session_id: &str) -> Result<(), DecodeError> {
    require_string(session_id, "session_id")?;
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(DecodeError::InvalidField {
            field: "session_id",
            reason: format!("must be {} characters or fewer", MAX_SESSION_ID_LEN),
        });
    }
    Ok(())
}

fn require_string(value: &str, field: &'static str) -> Result<(), DecodeError> {
    if value.trim().is_empty() {
        return Err(DecodeError::MissingField(field));
    }
    Ok(())
}

fn require_percentage(value: f64, field: &'static str) -> Result<(), DecodeError> {
    if !value.is_finite() || value < 0.0 {
        return Err(DecodeError::InvalidField {
            field,
            reason: "must be a finite, non-negative number".to_string(),
        });
    }
    Ok(())
}
