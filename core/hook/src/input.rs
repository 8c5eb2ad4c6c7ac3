//! Hook and status-line input as the assistant writes it to stdin.
//!
//! Cursor writes its own field names; [`CursorInput`] maps them onto
//! [`HookInput`] so event building does not care which tool called.

use clap::ValueEnum;
use jacques_protocol::ModelInfo;
use serde::Deserialize;
use std::path::Path;

/// The assistant that invoked the hook.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HookSource {
    #[default]
    ClaudeCode,
    Cursor,
}

impl HookSource {
    /// Value of the `source` field on registered sessions.
    pub fn as_str(self) -> &'static str {
        match self {
            HookSource::ClaudeCode => "claude_code",
            HookSource::Cursor => "cursor",
        }
    }

    pub fn parse(self, raw: &str) -> serde_json::Result<HookInput> {
        match self {
            HookSource::ClaudeCode => serde_json::from_str(raw),
            HookSource::Cursor => serde_json::from_str::<CursorInput>(raw).map(HookInput::from),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// SessionStart trigger: startup, resume, clear or compact.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub model: Option<ModelInfo>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub workspace: Option<Workspace>,
    #[serde(default)]
    pub context_window: Option<ContextWindow>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Workspace {
    #[serde(default)]
    pub current_dir: Option<String>,
    #[serde(default)]
    pub project_dir: Option<String>,
}

/// `context_window` object of the status-line JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextWindow {
    #[serde(default)]
    pub used_percentage: Option<f64>,
    #[serde(default)]
    pub remaining_percentage: Option<f64>,
    #[serde(default)]
    pub context_window_size: Option<u64>,
    #[serde(default)]
    pub total_input_tokens: Option<u64>,
    #[serde(default)]
    pub total_output_tokens: Option<u64>,
}

/// Hook input from Cursor's native agent hooks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CursorInput {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub workspace_roots: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    /// preCompact only.
    #[serde(default)]
    pub context_usage_percent: Option<f64>,
    #[serde(default)]
    pub context_tokens: Option<u64>,
    #[serde(default)]
    pub context_window_size: Option<u64>,
}

impl From<CursorInput> for HookInput {
    fn from(input: CursorInput) -> Self {
        let context_window = input.context_usage_percent.map(|used| ContextWindow {
            used_percentage: Some(used),
            remaining_percentage: Some((100.0 - used).max(0.0)),
            context_window_size: input.context_window_size,
            total_input_tokens: input.context_tokens,
            total_output_tokens: Some(0),
        });

        HookInput {
            session_id: input.conversation_id,
            transcript_path: None,
            cwd: None,
            // Cursor has no resume or clear; every sessionStart is a fresh start.
            source: Some("startup".to_string()),
            model: input.model.or(input.model_name).map(ModelInfo::Name),
            tool_name: Some(input.tool_name.unwrap_or_else(|| "unknown".to_string())),
            workspace: input.workspace_roots.into_iter().next().map(|root| Workspace {
                current_dir: None,
                project_dir: Some(root),
            }),
            context_window,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub project: String,
    pub project_dir: Option<String>,
    pub cwd: Option<String>,
}

impl HookInput {
    pub fn session_id(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn cwd(&self) -> Option<String> {
        self.workspace
            .as_ref()
            .and_then(|workspace| workspace.current_dir.clone())
            .or_else(|| self.cwd.clone())
            .filter(|cwd| !cwd.is_empty())
    }

    /// Project name and directory, preferring the workspace project dir over cwd.
    pub fn project_info(&self, process_cwd: Option<String>) -> ProjectInfo {
        let project_dir = self
            .workspace
            .as_ref()
            .and_then(|workspace| workspace.project_dir.clone())
            .filter(|dir| !dir.is_empty());
        let cwd = self.cwd().or(process_cwd);

        let project = project_dir
            .as_deref()
            .or(cwd.as_deref())
            .and_then(|path| Path::new(path).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Unknown".to_string());

        ProjectInfo {
            project,
            project_dir,
            cwd,
        }
    }
}

pub fn fallback_title(project: &str) -> String {
    format!("Session in {}", project)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_prefers_workspace_project_dir() {
        let input: HookInput = serde_json::from_str(
            r#"{"session_id":"S1","cwd":"/work/app/src","workspace":{"current_dir":"/work/app/src","project_dir":"/work/app"}}"#,
        )
        .unwrap();
        let info = input.project_info(None);
        assert_eq!(info.project, "app");
        assert_eq!(info.project_dir.as_deref(), Some("/work/app"));
        assert_eq!(info.cwd.as_deref(), Some("/work/app/src"));
    }

    #[test]
    fn project_falls_back_to_cwd_then_unknown() {
        let input: HookInput = serde_json::from_str(r#"{"session_id":"S1","cwd":"/work/tool"}"#).unwrap();
        assert_eq!(input.project_info(None).project, "tool");

        let empty = HookInput::default();
        assert_eq!(empty.project_info(None).project, "Unknown");
        assert_eq!(
            empty.project_info(Some("/home/dev/repo".to_string())).project,
            "repo"
        );
    }

    #[test]
    fn blank_session_id_is_missing() {
        let input: HookInput = serde_json::from_str(r#"{"session_id":"  "}"#).unwrap();
        assert_eq!(input.session_id(), None);
    }

    #[test]
    fn status_line_context_window_parses() {
        let input: HookInput = serde_json::from_str(
            r#"{"session_id":"S1","model":{"id":"claude-opus","display_name":"Opus"},"context_window":{"used_percentage":41.5,"remaining_percentage":58.5,"context_window_size":200000,"total_input_tokens":83000}}"#,
        )
        .unwrap();
        let window = input.context_window.expect("context window");
        assert_eq!(window.used_percentage, Some(41.5));
        assert_eq!(window.context_window_size, Some(200_000));
        assert!(matches!(input.model, Some(ModelInfo::Detailed { .. })));
    }

    #[test]
    fn cursor_fields_map_onto_hook_input() {
        let input = HookSource::Cursor
            .parse(
                r#"{"conversation_id":"C1","workspace_roots":["/work/web","/work/api"],"model_name":"gpt-5","context_usage_percent":30.0,"context_tokens":60000,"context_window_size":200000}"#,
            )
            .unwrap();

        assert_eq!(input.session_id(), Some("C1"));
        assert_eq!(input.project_info(None).project, "web");
        assert_eq!(input.model, Some(ModelInfo::Name("gpt-5".to_string())));
        assert_eq!(input.source.as_deref(), Some("startup"));
        assert_eq!(input.tool_name.as_deref(), Some("unknown"));
        let window = input.context_window.expect("context window");
        assert_eq!(window.remaining_percentage, Some(70.0));
        assert_eq!(window.total_input_tokens, Some(60_000));
        assert_eq!(window.total_output_tokens, Some(0));
    }

    #[test]
    fn cursor_input_ignores_claude_session_id() {
        let input = HookSource::Cursor.parse(r#"{"session_id":"S1"}"#).unwrap();
        assert_eq!(input.session_id(), None);
        assert!(input.context_window.is_none());

        let claude = HookSource::ClaudeCode.parse(r#"{"session_id":"S1"}"#).unwrap();
        assert_eq!(claude.session_id(), Some("S1"));
    }

    #[test]
    fn fallback_title_names_project() {
        assert_eq!(fallback_title("jacques"), "Session in jacques");
    }
}
