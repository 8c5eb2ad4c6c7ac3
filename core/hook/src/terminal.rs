//! Terminal identity detection for the window the assistant runs in.

use jacques_protocol::TerminalIdentity;
use std::env;
use std::ffi::CStr;
use std::process::Command;

pub fn detect() -> TerminalIdentity {
    identity_from(
        |key| env::var(key).ok(),
        stdin_tty(),
        Some(std::os::unix::process::parent_id()),
    )
}

pub fn identity_from<F>(env: F, tty: Option<String>, parent_pid: Option<u32>) -> TerminalIdentity
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| env(key).filter(|value| !value.trim().is_empty());
    TerminalIdentity {
        iterm_session_id: var("ITERM_SESSION_ID"),
        kitty_window_id: var("KITTY_WINDOW_ID"),
        wezterm_pane: var("WEZTERM_PANE"),
        tty,
        terminal_pid: parent_pid.filter(|pid| *pid > 1),
        term_program: var("TERM_PROGRAM"),
        term_session_id: var("TERM_SESSION_ID"),
        term: var("TERM"),
    }
}

/// TTY of stdin, falling back to `tty(1)` when stdin is a pipe.
fn stdin_tty() -> Option<String> {
    // SAFETY: isatty/ttyname only read the descriptor; the returned buffer is
    // copied before any other call can overwrite it.
    let from_stdin = unsafe {
        if libc::isatty(libc::STDIN_FILENO) == 1 {
            let name = libc::ttyname(libc::STDIN_FILENO);
            if name.is_null() {
                None
            } else {
                Some(CStr::from_ptr(name).to_string_lossy().into_owned())
            }
        } else {
            None
        }
    };

    from_stdin.or_else(|| {
        let output = Command::new("tty").output().ok()?;
        let tty = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || tty.is_empty() || tty == "not a tty" {
            return None;
        }
        Some(tty)
    })
}

/// Branch and worktree name for `project_dir`, via `git rev-parse`.
pub fn git_info(project_dir: &str) -> (Option<String>, Option<String>) {
    if project_dir.is_empty() || !std::path::Path::new(project_dir).is_dir() {
        return (None, None);
    }

    let branch = run_git(project_dir, &["rev-parse", "--abbrev-ref", "HEAD"]);
    let git_dir = run_git(project_dir, &["rev-parse", "--git-dir"]);
    let common_dir = run_git(project_dir, &["rev-parse", "--git-common-dir"]);

    let worktree = match (git_dir, common_dir) {
        (Some(git_dir), Some(common_dir)) if git_dir != common_dir => std::path::Path::new(project_dir)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        _ => None,
    };

    (branch, worktree)
}

fn run_git(dir: &str, args: &[&str]) -> Option<String> {
    let output = Command::new("git").arg("-C").arg(dir).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}
