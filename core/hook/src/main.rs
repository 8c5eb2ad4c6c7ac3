//! jacques-hook: reports assistant session lifecycle events to the jacques daemon.
//!
//! Called directly by the assistant's hooks (configured in `~/.claude/settings.json`)
//! and by its status line. Each invocation reads the hook JSON from stdin, sends
//! one event line to the daemon socket and exits.
//!
//! ## Subcommands
//!
//! - `session-start`: register the session with terminal identity (SessionStart hook)
//! - `activity`: tool use heartbeat (PostToolUse hook)
//! - `idle`: assistant finished responding (Stop hook)
//! - `session-end`: session closed (SessionEnd hook)
//! - `context`: context window usage (status line command)
//! - `focus`: report that a terminal window gained focus
//!
//! `--source cursor` reads Cursor's hook JSON instead (sessionStart, postToolUse,
//! preCompact as `context`, sessionEnd).
//!
//! Hooks must never disrupt the assistant: every failure is logged to
//! `~/.jacques/logs/` and the process exits 0.

mod client;
mod error;
mod input;
mod logging;
mod payload;
mod terminal;

use clap::{Parser, Subcommand};
use input::HookSource;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "jacques-hook")]
#[command(about = "Jacques session event reporter")]
#[command(version)]
struct Cli {
    /// Assistant whose hook JSON arrives on stdin
    #[arg(long, global = true, value_enum, default_value_t = HookSource::ClaudeCode)]
    source: HookSource,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookKind {
    /// Register a session (reads SessionStart hook JSON from stdin)
    SessionStart,
    /// Report tool activity (reads PostToolUse hook JSON from stdin)
    Activity,
    /// Mark the session idle (reads Stop hook JSON from stdin)
    Idle,
    /// Unregister a session (reads SessionEnd hook JSON from stdin)
    SessionEnd,
    /// Report context usage (reads status line JSON from stdin)
    Context,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Hook(HookKind),

    /// Report that the terminal identified by KEY gained focus
    Focus {
        /// Terminal key, e.g. TTY:/dev/ttys003 or ITERM:<session id>
        #[arg(value_name = "KEY")]
        terminal_key: String,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    if client::skip_requested() {
        debug!("Reporting skipped by JACQUES_SKIP");
        return;
    }

    let result = match cli.command {
        Commands::Hook(kind) => payload::run(kind, cli.source),
        Commands::Focus { terminal_key } => payload::run_focus(&terminal_key),
    };

    if let Err(err) = result {
        warn!(error = %err, "jacques-hook failed");
    }
}
