//! Auto-compact toggle backed by the assistant's `settings.json`.
//!
//! Only the `autoCompact` key is touched; everything else in the file is
//! preserved. A missing file counts as auto-compact enabled. A file that
//! cannot be read or parsed is left alone and the toggle fails.

use fs_err as fs;
use jacques_protocol::{
    autocompact_enabled, AutoCompactStatus, AUTOCOMPACT_SETTINGS_KEY, AUTOCOMPACT_THRESHOLD_ENV,
};
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Read(#[source] std::io::Error),

    #[error("settings file {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("settings file {} is not a JSON object", path.display())]
    NotAnObject { path: PathBuf },

    #[error("failed to write settings: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoCompactToggle {
    pub enabled: bool,
    pub threshold: u32,
    pub bug_threshold: Option<u32>,
    pub warning: Option<String>,
}

impl From<AutoCompactStatus> for AutoCompactToggle {
    fn from(status: AutoCompactStatus) -> Self {
        Self {
            enabled: status.enabled,
            threshold: status.threshold,
            bug_threshold: status.bug_threshold,
            warning: status.warning().map(str::to_string),
        }
    }
}

/// Flips `autoCompact` and returns the new state.
pub fn toggle_autocompact(path: &Path, threshold_override: Option<&str>) -> Result<AutoCompactToggle, SettingsError> {
    let mut settings = Value::Object(read_settings(path)?);
    let status = AutoCompactStatus::new(!autocompact_enabled(&settings), threshold_override);
    settings[AUTOCOMPACT_SETTINGS_KEY] = Value::Bool(status.enabled);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(SettingsError::Write)?;
    }
    let body = serde_json::to_string_pretty(&settings).map_err(SettingsError::Serialize)?;
    fs::write(path, body).map_err(SettingsError::Write)?;

    info!(enabled = status.enabled, path = %path.display(), "Toggled auto-compact");

    Ok(status.into())
}

/// Reads the threshold override from the environment the daemon was started in.
pub fn threshold_override_from_env() -> Option<String> {
    std::env::var(AUTOCOMPACT_THRESHOLD_ENV).ok()
}

fn read_settings(path: &Path) -> Result<Map<String, Value>, SettingsError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
        Err(err) => return Err(SettingsError::Read(err)),
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(SettingsError::NotAnObject {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_toggles_to_disabled_with_warning() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join(".claude").join("settings.json");

        let toggle = toggle_autocompact(&path, None).expect("toggle");
        assert!(!toggle.enabled);
        assert_eq!(toggle.threshold, 95);
        assert_eq!(toggle.bug_threshold, Some(78));
        assert_eq!(toggle.warning.as_deref(), Some("Known bug: may still trigger at ~78%"));

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["autoCompact"], false);
    }

    #[test]
    fn toggle_preserves_other_keys_and_flips_back() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("settings.json");
        fs::write(&path, r#"{"autoCompact": false, "theme": "dark"}"#).unwrap();

        let toggle = toggle_autocompact(&path, Some("80")).expect("toggle");
        assert!(toggle.enabled);
        assert_eq!(toggle.threshold, 80);
        assert_eq!(toggle.bug_threshold, None);
        assert_eq!(toggle.warning, None);

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["autoCompact"], true);
        assert_eq!(written["theme"], "dark");
    }

    #[test]
    fn out_of_range_override_uses_default_threshold() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("settings.json");

        assert_eq!(toggle_autocompact(&path, Some("abc")).expect("toggle").threshold, 95);
        assert_eq!(toggle_autocompact(&path, Some("0")).expect("toggle").threshold, 95);
        assert_eq!(toggle_autocompact(&path, Some("500")).expect("toggle").threshold, 95);
        assert_eq!(toggle_autocompact(&path, Some(" 70 ")).expect("toggle").threshold, 70);
    }

    #[test]
    fn unparseable_settings_are_left_untouched() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("settings.json");
        let original = "{\"autoCompact\": false, \"theme\": \"dark\",\n";
        fs::write(&path, original).unwrap();

        let err = toggle_autocompact(&path, None).expect_err("toggle must fail");
        assert!(matches!(err, SettingsError::Parse { .. }), "got {err:?}");
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn non_object_settings_are_left_untouched() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("settings.json");
        fs::write(&path, "[1, 2]").unwrap();

        let err = toggle_autocompact(&path, None).expect_err("toggle must fail");
        assert!(matches!(err, SettingsError::NotAnObject { .. }), "got {err:?}");
        assert_eq!(fs::read_to_string(&path).unwrap(), "[1, 2]");
    }
}
