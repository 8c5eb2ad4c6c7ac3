//! Focus resolution: which session the user is most likely looking at.
//!
//! A session's priority is the later of its last activity and its last focus
//! hint. The highest priority wins; ties go to the later registration, then to
//! the lexically greater session id, so the result never depends on map order.

use jacques_protocol::Session;
use std::cmp::Ordering;
use tracing::debug;

/// A change in the focused session, reported only when the id actually moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusChange {
    pub session_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct FocusResolver {
    last_reported: Option<String>,
}

impl FocusResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&str> {
        self.last_reported.as_deref()
    }

    /// Recomputes focus over `sessions`, returning `Some` only on change.
    pub fn recompute<'a, I>(&mut self, sessions: I) -> Option<FocusChange>
    where
        I: IntoIterator<Item = &'a Session>,
    {
        let focused = focused_session(sessions).map(|session| session.session_id.clone());
        if focused == self.last_reported {
            return None;
        }
        debug!(
            from = ?self.last_reported,
            to = ?focused,
            "Focus changed"
        );
        self.last_reported = focused.clone();
        Some(FocusChange {
            session_id: focused,
        })
    }
}

pub fn focused_session<'a, I>(sessions: I) -> Option<&'a Session>
where
    I: IntoIterator<Item = &'a Session>,
{
    sessions.into_iter().max_by(|a, b| compare_priority(a, b))
}

fn compare_priority(a: &Session, b: &Session) -> Ordering {
    a.focus_priority()
        .cmp(&b.focus_priority())
        .then_with(|| a.registered_at.cmp(&b.registered_at))
        .then_with(|| a.session_id.cmp(&b.session_id))
}
