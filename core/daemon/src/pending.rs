//! Replay of events hooks spooled to disk while the daemon was down.
//!
//! The spool is renamed before reading so hooks that fire during replay start a
//! fresh file instead of racing the drain.

use chrono::{DateTime, Duration, Utc};
use fs_err as fs;
use jacques_protocol::{decode_line, Decoded, EventEnvelope};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};

/// Takes the spool at `path`, returning its contents. `None` when there is nothing to replay.
pub fn take_pending(path: &Path) -> std::io::Result<Option<String>> {
    let draining = path.with_extension("jsonl.replaying");
    match fs::rename(path, &draining) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    }
    let content = fs::read_to_string(&draining)?;
    if let Err(err) = fs::remove_file(&draining) {
        warn!(error = %err, path = %draining.display(), "Failed to remove drained spool");
    }
    Ok(Some(content))
}

/// Decodes spooled lines, keeping events recorded within `max_age` of `now`, in file order.
pub fn replayable(content: &str, now: DateTime<Utc>, max_age: Duration) -> Vec<EventEnvelope> {
    let cutoff = now - max_age;
    let mut events = Vec::new();
    let mut skipped = 0usize;

    for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let envelope = match decode_line(line.as_bytes()) {
            Ok(Decoded::Event(envelope)) => envelope,
            Ok(Decoded::Ignored { kind }) => {
                debug!(kind = %kind, "Skipping spooled event of unknown kind");
                skipped += 1;
                continue;
            }
            Err(err) => {
                warn!(code = err.code(), error = %err, "Skipping malformed spooled event");
                skipped += 1;
                continue;
            }
        };

        match envelope.recorded_at() {
            Some(recorded_at) if recorded_at >= cutoff => events.push(envelope),
            _ => skipped += 1,
        }
    }

    if skipped > 0 || !events.is_empty() {
        info!(replaying = events.len(), skipped, "Loaded spooled events");
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn line(session_id: &str, at: DateTime<Utc>) -> String {
        format!(
            r#"{{"event":"session_start","session_id":"{}","timestamp":"{}"}}"#,
            session_id,
            at.to_rfc3339()
        )
    }

    #[test]
    fn keeps_recent_events_in_order() {
        let content = [
            line("old", t(0)),
            line("A", t(900)),
            "not json".to_string(),
            r#"{"event":"session_start","session_id":"no-time"}"#.to_string(),
            r#"{"event":"mystery","session_id":"X"}"#.to_string(),
            line("B", t(1000)),
        ]
        .join("\n");

        let events = replayable(&content, t(1000), Duration::seconds(300));
        let ids: Vec<&str> = events
            .iter()
            .filter_map(|e| e.event.session_id())
            .collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn accepts_epoch_timestamps() {
        let content = format!(
            r#"{{"event":"activity","session_id":"A","timestamp":{}.25}}"#,
            t(10).timestamp()
        );
        assert_eq!(replayable(&content, t(20), Duration::seconds(300)).len(), 1);
    }

    #[test]
    fn take_pending_renames_then_removes_spool() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("pending-events.jsonl");
        assert!(take_pending(&path).unwrap().is_none());

        fs::write(&path, line("A", t(0))).unwrap();
        let content = take_pending(&path).unwrap().expect("content");
        assert!(content.contains("\"A\""));
        assert!(!path.exists());
        assert!(!path.with_extension("jsonl.replaying").exists());
    }
}
