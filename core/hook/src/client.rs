//! Delivery of event lines to the daemon socket.
//!
//! One connection per event: connect, write the line, close. When the daemon is
//! down, `session_start` lines are appended to the spool file the daemon replays
//! at startup; every other event is simply dropped.

use fs_err::{self as fs, OpenOptions};
use jacques_protocol::{DATA_DIR_NAME, PENDING_EVENTS_FILE, SOCKET_ENV, SOCKET_NAME};
use std::env;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::HookError;

const SKIP_ENV: &str = "JACQUES_SKIP";
const SKIP_FILE: &str = "skip";
const WRITE_TIMEOUT_MS: u64 = 1000;

pub fn data_dir() -> Result<PathBuf, HookError> {
    let home = dirs::home_dir().ok_or(HookError::HomeNotFound)?;
    Ok(home.join(DATA_DIR_NAME))
}

pub fn socket_path() -> Result<PathBuf, HookError> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(data_dir()?.join(SOCKET_NAME))
}

/// True when reporting is switched off via `JACQUES_SKIP=1` or `~/.jacques/skip`.
pub fn skip_requested() -> bool {
    let env_skip = env::var(SKIP_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    env_skip
        || data_dir()
            .map(|dir| dir.join(SKIP_FILE).exists())
            .unwrap_or(false)
}

pub fn send_line(socket: &Path, line: &[u8]) -> Result<(), HookError> {
    let mut stream = UnixStream::connect(socket).map_err(HookError::DaemonUnavailable)?;
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));
    stream.write_all(line).map_err(HookError::DaemonUnavailable)?;
    stream.flush().map_err(HookError::DaemonUnavailable)?;
    Ok(())
}

pub fn append_to_spool(path: &Path, line: &[u8]) -> Result<(), HookError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(HookError::Spool)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(HookError::Spool)?;
    file.write_all(line).map_err(HookError::Spool)?;
    Ok(())
}

/// Sends `line`, spooling it to disk on failure when `spool` is set.
pub fn deliver(line: &[u8], spool: bool) -> Result<(), HookError> {
    let socket = socket_path()?;
    match send_line(&socket, line) {
        Ok(()) => Ok(()),
        Err(err) if spool => {
            let path = data_dir()?.join(PENDING_EVENTS_FILE);
            info!(error = %err, path = %path.display(), "Daemon unavailable; spooling event");
            append_to_spool(&path, line)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixListener;

    #[test]
    fn send_line_writes_one_frame() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let socket = temp_dir.path().join("d.sock");
        let listener = UnixListener::bind(&socket).expect("bind");

        send_line(&socket, b"{\"event\":\"idle\",\"session_id\":\"S1\"}\n").expect("send");

        let (mut stream, _) = listener.accept().expect("accept");
        let mut received = String::new();
        stream.read_to_string(&mut received).expect("read");
        assert_eq!(received, "{\"event\":\"idle\",\"session_id\":\"S1\"}\n");
    }

    #[test]
    fn send_line_fails_without_daemon() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let err = send_line(&temp_dir.path().join("missing.sock"), b"x\n").unwrap_err();
        assert!(matches!(err, HookError::DaemonUnavailable(_)));
    }

    #[test]
    fn spool_appends_lines() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("nested").join("pending-events.jsonl");
        append_to_spool(&path, b"a\n").expect("first");
        append_to_spool(&path, b"b\n").expect("second");
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\n");
    }
}
