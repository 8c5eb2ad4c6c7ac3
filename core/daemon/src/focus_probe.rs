//! OS window-focus watcher.
//!
//! A [`FocusProbe`] answers "which terminal window is frontmost right now" as a
//! terminal key. The [`FocusWatcher`] polls it off the async runtime and turns
//! changes into `focus_hint` events for the engine, the same way any hook would.

use jacques_protocol::{EventEnvelope, FocusHint, IngestEvent};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::EngineHandle;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed {
        program: &'static str,
        status: std::process::ExitStatus,
    },
}

pub trait FocusProbe: Send + Sync {
    fn frontmost_terminal_key(&self) -> Result<Option<String>, ProbeError>;
}

/// Probe for platforms without a focus query; never reports a window.
#[derive(Debug, Clone, Default)]
pub struct NullFocusProbe;

impl FocusProbe for NullFocusProbe {
    fn frontmost_terminal_key(&self) -> Result<Option<String>, ProbeError> {
        Ok(None)
    }
}

/// macOS probe using `osascript` against System Events, iTerm2 and Terminal.app.
#[derive(Debug, Clone, Default)]
pub struct MacFocusProbe;

const FRONTMOST_APP_SCRIPT: &str =
    "tell application \"System Events\" to get name of first application process whose frontmost is true";
const ITERM_SESSION_SCRIPT: &str =
    "tell application \"iTerm2\" to get unique id of current session of current window";
const TERMINAL_TTY_SCRIPT: &str =
    "tell application \"Terminal\" to get tty of selected tab of front window";

impl FocusProbe for MacFocusProbe {
    fn frontmost_terminal_key(&self) -> Result<Option<String>, ProbeError> {
        let app = run_osascript(FRONTMOST_APP_SCRIPT)?;
        match app.as_str() {
            "iTerm2" | "iTerm" => {
                Ok(non_empty(run_osascript(ITERM_SESSION_SCRIPT)?).map(|id| format!("ITERM:{}", id)))
            }
            "Terminal" => {
                Ok(non_empty(run_osascript(TERMINAL_TTY_SCRIPT)?).map(|tty| format!("TTY:{}", tty)))
            }
            _ => Ok(None),
        }
    }
}

fn run_osascript(script: &str) -> Result<String, ProbeError> {
    let output = Command::new("osascript")
        .args(["-e", script])
        .output()
        .map_err(|source| ProbeError::Spawn {
            program: "osascript",
            source,
        })?;
    if !output.status.success() {
        return Err(ProbeError::Failed {
            program: "osascript",
            status: output.status,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// The probe for the platform the daemon was built for.
pub fn platform_probe() -> Arc<dyn FocusProbe> {
    if cfg!(target_os = "macos") {
        Arc::new(MacFocusProbe)
    } else {
        Arc::new(NullFocusProbe)
    }
}

pub struct FocusWatcher {
    probe: Arc<dyn FocusProbe>,
    interval: Duration,
    last_key: Option<String>,
}

impl FocusWatcher {
    pub fn new(probe: Arc<dyn FocusProbe>, interval: Duration) -> Self {
        Self {
            probe,
            interval,
            last_key: None,
        }
    }

    /// Records an observation; returns the key to hint only when it changed to a window.
    fn observe(&mut self, key: Option<String>) -> Option<String> {
        if key == self.last_key {
            return None;
        }
        self.last_key = key.clone();
        key
    }

    pub async fn run(mut self, engine: EngineHandle, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "Focus watcher started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut probe_failing = false;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let probe = Arc::clone(&self.probe);
                    let observed = match tokio::task::spawn_blocking(move || probe.frontmost_terminal_key()).await {
                        Ok(Ok(key)) => {
                            probe_failing = false;
                            key
                        }
                        Ok(Err(err)) => {
                            if !probe_failing {
                                warn!(error = %err, "Focus probe failed");
                                probe_failing = true;
                            }
                            continue;
                        }
                        Err(err) => {
                            warn!(error = %err, "Focus probe task panicked");
                            continue;
                        }
                    };

                    let Some(terminal_key) = self.observe(observed) else {
                        continue;
                    };
                    debug!(terminal_key = %terminal_key, "Frontmost terminal changed");
                    let envelope = EventEnvelope::new(IngestEvent::FocusHint(FocusHint { terminal_key }));
                    if engine.ingest(envelope).await.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Focus watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedProbe {
        keys: Mutex<Vec<Option<String>>>,
    }

    impl FocusProbe for ScriptedProbe {
        fn frontmost_terminal_key(&self) -> Result<Option<String>, ProbeError> {
            let mut keys = self.keys.lock().unwrap();
            if keys.is_empty() {
                Ok(None)
            } else {
                Ok(keys.remove(0))
            }
        }
    }

    #[test]
    fn observe_is_edge_triggered() {
        let mut watcher = FocusWatcher::new(Arc::new(NullFocusProbe), Duration::from_millis(10));
        assert_eq!(watcher.observe(Some("TTY:a".into())), Some("TTY:a".to_string()));
        assert_eq!(watcher.observe(Some("TTY:a".into())), None);
        assert_eq!(watcher.observe(None), None);
        assert_eq!(watcher.observe(Some("TTY:a".into())), Some("TTY:a".to_string()));
        assert_eq!(watcher.observe(Some("TTY:b".into())), Some("TTY:b".to_string()));
    }

    #[test]
    fn null_probe_reports_nothing() {
        assert!(NullFocusProbe.frontmost_terminal_key().unwrap().is_none());
    }

    #[tokio::test]
    async fn watcher_feeds_focus_hints_into_engine() {
        use crate::engine::Engine;
        use jacques_protocol::{SessionStart, TerminalIdentity};

        let (engine, _task) = Engine::new(8).spawn(16);
        for (id, tty) in [("S1", "/dev/ttys1"), ("S2", "/dev/ttys2")] {
            engine
                .ingest(EventEnvelope::new(IngestEvent::SessionStart(SessionStart {
                    session_id: id.to_string(),
                    terminal: Some(TerminalIdentity {
                        tty: Some(tty.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                })))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;

        let probe = Arc::new(ScriptedProbe {
            keys: Mutex::new(vec![Some("TTY:/dev/ttys1".to_string())]),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = FocusWatcher::new(probe, Duration::from_millis(10));
        let task = tokio::spawn(watcher.run(engine.clone(), shutdown_rx));

        let mut focused = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            focused = engine.snapshot().await.unwrap().focused_session_id;
            if focused.as_deref() == Some("S1") {
                break;
            }
        }
        assert_eq!(focused.as_deref(), Some("S1"));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
