use serde::{Deserialize, Serialize};

use crate::Session;

/// Messages pushed from the daemon to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    InitialState {
        sessions: Vec<Session>,
        focused_session_id: Option<String>,
    },
    SessionUpdate {
        session: Session,
    },
    SessionRemoved {
        session_id: String,
    },
    FocusChanged {
        session_id: Option<String>,
        session: Option<Session>,
    },
    AutocompactToggled {
        enabled: bool,
        threshold: u32,
        bug_threshold: Option<u32>,
        warning: Option<String>,
        session_id: Option<String>,
    },
    ActionAcknowledged {
        session_id: String,
        action: String,
        accepted: bool,
        reason: Option<String>,
    },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::InitialState { .. } => "initial_state",
            ServerMessage::SessionUpdate { .. } => "session_update",
            ServerMessage::SessionRemoved { .. } => "session_removed",
            ServerMessage::FocusChanged { .. } => "focus_changed",
            ServerMessage::AutocompactToggled { .. } => "autocompact_toggled",
            ServerMessage::ActionAcknowledged { .. } => "action_acknowledged",
        }
    }
}

/// Control messages sent by viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SelectSession {
        session_id: String,
    },
    ToggleAutocompact {
        #[serde(default)]
        session_id: Option<String>,
    },
    TriggerAction {
        session_id: String,
        action: String,
    },
}
