//! Session registry: the canonical in-memory session map.
//!
//! Every ingestion event is applied as a pure transition on this map. The
//! registry is owned by the engine actor and never shared, so nothing here
//! locks. Each transition returns the sessions it changed; an empty result means
//! nothing changed and nothing should be broadcast.

use chrono::{DateTime, Utc};
use jacques_protocol::{
    resolve_key_at, Activity, ContextUpdate, IngestEvent, Session, SessionStart, SessionStatus,
    TerminalIdentity, AUTO_KEY_PREFIX, UNKNOWN_KEY_PREFIX,
};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange {
    Updated(Session),
    Removed(String),
}

#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<String, Session>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Sessions ordered by registration time, for snapshots.
    pub fn snapshot(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        sessions
    }

    pub fn apply(&mut self, event: &IngestEvent, now: DateTime<Utc>) -> Vec<RegistryChange> {
        match event {
            IngestEvent::SessionStart(start) => vec![self.session_start(start, now)],
            IngestEvent::Activity(activity) => vec![self.activity(activity, now)],
            IngestEvent::ContextUpdate(update) => vec![self.context_update(update, now)],
            IngestEvent::Idle(target) => self.idle(&target.session_id).into_iter().collect(),
            IngestEvent::SessionEnd(target) => {
                self.session_end(&target.session_id).into_iter().collect()
            }
            IngestEvent::FocusHint(hint) => self.focus_hint(&hint.terminal_key, now),
        }
    }

    /// Viewer-initiated focus: treated like a focus hint for one session.
    pub fn select(&mut self, session_id: &str, now: DateTime<Utc>) -> Option<Session> {
        let session = self.sessions.get_mut(session_id)?;
        session.last_focus_hint_at = Some(now);
        Some(session.clone())
    }

    fn session_start(&mut self, start: &SessionStart, now: DateTime<Utc>) -> RegistryChange {
        let mut terminal_key = terminal_key_for(start, now);
        let known = self.sessions.contains_key(&start.session_id);
        if terminal_key.starts_with(UNKNOWN_KEY_PREFIX) {
            // An unidentifiable re-registration keeps whatever real key it had.
            if let Some(existing) = self
                .sessions
                .get(&start.session_id)
                .filter(|session| !session.is_auto_registered())
            {
                terminal_key = existing.terminal_key.clone();
            }
        }
        let session = self
            .sessions
            .entry(start.session_id.clone())
            .or_insert_with(|| Session::new(&start.session_id, terminal_key.clone(), now));

        if known {
            info!(
                session_id = %start.session_id,
                from = %session.terminal_key,
                to = %terminal_key,
                "Upgrading registered session"
            );
        } else {
            info!(session_id = %start.session_id, terminal_key = %terminal_key, "Registering session");
        }

        session.terminal_key = terminal_key;
        session.status = SessionStatus::Active;
        session.last_activity = now;
        merge(&mut session.terminal, &start.terminal);
        merge(&mut session.session_title, &start.session_title);
        merge(&mut session.transcript_path, &start.transcript_path);
        merge(&mut session.cwd, &start.cwd);
        merge(&mut session.project, &start.project);
        merge(&mut session.project_dir, &start.project_dir);
        merge(&mut session.model, &start.model);
        merge(&mut session.source, &start.source);
        merge(&mut session.git_branch, &start.git_branch);
        merge(&mut session.git_worktree, &start.git_worktree);
        merge(&mut session.autocompact, &start.autocompact);

        RegistryChange::Updated(session.clone())
    }

    fn activity(&mut self, activity: &Activity, now: DateTime<Utc>) -> RegistryChange {
        let session = self.get_or_auto_register(&activity.session_id, now);
        session.status = activity
            .status
            .map(SessionStatus::from)
            .unwrap_or(SessionStatus::Working);
        session.last_activity = now;
        merge(&mut session.session_title, &activity.session_title);
        merge(&mut session.last_tool_name, &activity.tool_name);
        if let Some(pid) = activity.terminal_pid.filter(|pid| *pid > 0) {
            session
                .terminal
                .get_or_insert_with(TerminalIdentity::default)
                .terminal_pid = Some(pid);
        }
        RegistryChange::Updated(session.clone())
    }

    fn context_update(&mut self, update: &ContextUpdate, now: DateTime<Utc>) -> RegistryChange {
        let session = self.get_or_auto_register(&update.session_id, now);
        session.context_metrics = Some(update.metrics());
        session.last_activity = now;
        merge(&mut session.cwd, &update.cwd);
        merge(&mut session.project_dir, &update.project_dir);
        merge(&mut session.model, &update.model);
        RegistryChange::Updated(session.clone())
    }

    fn idle(&mut self, session_id: &str) -> Option<RegistryChange> {
        let Some(session) = self.sessions.get_mut(session_id) else {
            debug!(session_id = %session_id, "Idle for unknown session ignored");
            return None;
        };
        if session.status == SessionStatus::Idle {
            return None;
        }
        session.status = SessionStatus::Idle;
        Some(RegistryChange::Updated(session.clone()))
    }

    fn session_end(&mut self, session_id: &str) -> Option<RegistryChange> {
        match self.sessions.remove(session_id) {
            Some(_) => {
                info!(session_id = %session_id, "Session ended");
                Some(RegistryChange::Removed(session_id.to_string()))
            }
            None => {
                debug!(session_id = %session_id, "Session end for unknown session ignored");
                None
            }
        }
    }

    fn focus_hint(&mut self, terminal_key: &str, now: DateTime<Utc>) -> Vec<RegistryChange> {
        self.sessions
            .values_mut()
            .filter(|session| terminal_keys_match(&session.terminal_key, terminal_key))
            .map(|session| {
                session.last_focus_hint_at = Some(now);
                RegistryChange::Updated(session.clone())
            })
            .collect()
    }

    fn get_or_auto_register(&mut self, session_id: &str, now: DateTime<Utc>) -> &mut Session {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!(session_id = %session_id, "Auto-registering session");
                Session::new(session_id, format!("{}{}", AUTO_KEY_PREFIX, session_id), now)
            })
    }
}

fn merge<T: Clone>(target: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *target = Some(value.clone());
    }
}

/// Key for a registering session: the identity bag wins unless it only yields
/// an `UNKNOWN:` key and the producer sent a resolved key of its own.
fn terminal_key_for(start: &SessionStart, now: DateTime<Utc>) -> String {
    let provided = start
        .terminal_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty());

    match (&start.terminal, provided) {
        (Some(identity), provided) => {
            let resolved = resolve_key_at(identity, now);
            match provided {
                Some(key) if resolved.starts_with(UNKNOWN_KEY_PREFIX) => key.to_string(),
                _ => resolved,
            }
        }
        (None, Some(key)) => key.to_string(),
        (None, None) => resolve_key_at(&TerminalIdentity::default(), now),
    }
}

/// Exact match, except iTerm keys where one side may carry the `w0t0p0:` locator
/// prefix of `ITERM_SESSION_ID` and the other only the session UUID.
fn terminal_keys_match(session_key: &str, hint_key: &str) -> bool {
    if session_key == hint_key {
        return true;
    }
    match (
        session_key.strip_prefix("ITERM:"),
        hint_key.strip_prefix("ITERM:"),
    ) {
        (Some(a), Some(b)) => iterm_uuid(a) == iterm_uuid(b),
        _ => false,
    }
}

fn iterm_uuid(value: &str) -> &str {
    value.rsplit_once(':').map(|(_, uuid)| uuid).unwrap_or(value)
}
