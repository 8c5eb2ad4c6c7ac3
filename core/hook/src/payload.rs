//! Builds event envelopes from hook input and hands them to the client.

use jacques_protocol::{
    encode_line, resolve_key, Activity, ActivityStatus, AutoCompactStatus, ContextUpdate,
    EventEnvelope, FocusHint, IngestEvent, SessionRef, SessionStart, TerminalIdentity,
    AUTOCOMPACT_THRESHOLD_ENV,
};
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use crate::client;
use crate::error::HookError;
use crate::input::{fallback_title, HookInput, HookSource};
use crate::terminal;
use crate::HookKind;

pub fn run(kind: HookKind, source: HookSource) -> Result<(), HookError> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .map_err(HookError::Stdin)?;

    let input = match source.parse(&raw) {
        Ok(input) => input,
        Err(err) => {
            warn!(hook = ?kind, source = source.as_str(), error = %err, "Ignoring invalid hook input");
            return Ok(());
        }
    };

    let Some(envelope) = build(kind, source, &input) else {
        warn!(hook = ?kind, "Hook input has no session_id");
        return Ok(());
    };

    send(&envelope, kind == HookKind::SessionStart)
}

pub fn run_focus(terminal_key: &str) -> Result<(), HookError> {
    let Some(envelope) = focus_envelope(terminal_key) else {
        warn!("Ignoring focus report with empty terminal key");
        return Ok(());
    };
    send(&envelope, false)
}

fn send(envelope: &EventEnvelope, spool: bool) -> Result<(), HookError> {
    let line = encode_line(envelope).map_err(HookError::Encode)?;
    client::deliver(&line, spool)?;
    debug!(
        event = envelope.event.kind(),
        session_id = envelope.event.session_id().unwrap_or("-"),
        "Event sent"
    );
    Ok(())
}

fn build(kind: HookKind, source: HookSource, input: &HookInput) -> Option<EventEnvelope> {
    let session_id = input.session_id()?.to_string();
    let event = match kind {
        HookKind::SessionStart => {
            let autocompact = (source == HookSource::ClaudeCode).then(|| {
                let settings_path = dirs::home_dir()
                    .map(|home| home.join(".claude").join("settings.json"));
                autocompact_status(
                    settings_path.as_deref(),
                    std::env::var(AUTOCOMPACT_THRESHOLD_ENV).ok().as_deref(),
                )
            });
            IngestEvent::SessionStart(session_start(
                session_id,
                source,
                input,
                terminal::detect(),
                autocompact,
                process_cwd(),
            ))
        }
        HookKind::Activity => IngestEvent::Activity(activity(
            session_id,
            input,
            Some(std::os::unix::process::parent_id()),
            process_cwd(),
        )),
        HookKind::Idle => IngestEvent::Idle(SessionRef { session_id }),
        HookKind::SessionEnd => IngestEvent::SessionEnd(SessionRef { session_id }),
        HookKind::Context => {
            let mut update = context_update(session_id, input)?;
            // Cursor's preCompact names the summarization model, not the chat model.
            if source == HookSource::Cursor {
                update.model = None;
            }
            IngestEvent::ContextUpdate(update)
        }
    };
    Some(EventEnvelope::new(event))
}

fn focus_envelope(terminal_key: &str) -> Option<EventEnvelope> {
    let terminal_key = terminal_key.trim();
    if terminal_key.is_empty() {
        return None;
    }
    Some(EventEnvelope::new(IngestEvent::FocusHint(FocusHint {
        terminal_key: terminal_key.to_string(),
    })))
}

fn process_cwd() -> Option<String> {
    std::env::current_dir()
        .ok()
        .map(|dir| dir.to_string_lossy().into_owned())
}

fn session_start(
    session_id: String,
    source: HookSource,
    input: &HookInput,
    identity: TerminalIdentity,
    autocompact: Option<AutoCompactStatus>,
    process_cwd: Option<String>,
) -> SessionStart {
    let info = input.project_info(process_cwd);
    let (git_branch, git_worktree) = info
        .project_dir
        .as_deref()
        .or(info.cwd.as_deref())
        .map(terminal::git_info)
        .unwrap_or((None, None));

    SessionStart {
        session_id,
        terminal_key: Some(resolve_key(&identity)),
        terminal: Some(identity),
        session_title: Some(fallback_title(&info.project)),
        transcript_path: input.transcript_path.clone(),
        cwd: info.cwd,
        project: Some(info.project),
        project_dir: info.project_dir,
        model: input.model.clone(),
        source: Some(source.as_str().to_string()),
        hook_source: input.source.clone(),
        git_branch,
        git_worktree,
        autocompact,
    }
}

fn activity(
    session_id: String,
    input: &HookInput,
    terminal_pid: Option<u32>,
    process_cwd: Option<String>,
) -> Activity {
    let info = input.project_info(process_cwd);
    Activity {
        session_id,
        session_title: Some(fallback_title(&info.project)),
        tool_name: input.tool_name.clone(),
        terminal_pid: terminal_pid.filter(|pid| *pid > 1),
        status: Some(ActivityStatus::Working),
    }
}

/// `None` when the status line carries no usage percentage yet.
fn context_update(session_id: String, input: &HookInput) -> Option<ContextUpdate> {
    let window = input.context_window.as_ref()?;
    let used_percentage = window.used_percentage?;
    let project_dir = input
        .workspace
        .as_ref()
        .and_then(|workspace| workspace.project_dir.clone());

    Some(ContextUpdate {
        session_id,
        used_percentage,
        remaining_percentage: window
            .remaining_percentage
            .or(Some((100.0 - used_percentage).max(0.0))),
        context_window_size: window.context_window_size,
        total_input_tokens: window.total_input_tokens,
        total_output_tokens: window.total_output_tokens,
        is_estimate: false,
        cwd: input.cwd(),
        project_dir,
        model: input.model.clone(),
    })
}

/// Auto-compact state from the assistant settings file.
///
/// A missing or unreadable file means the default (enabled at 95%).
fn autocompact_status(settings_path: Option<&Path>, threshold_override: Option<&str>) -> AutoCompactStatus {
    let settings = settings_path
        .and_then(|path| fs_err::read_to_string(path).ok())
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
        .unwrap_or(serde_json::Value::Null);
    AutoCompactStatus::from_settings(&settings, threshold_override)
}
