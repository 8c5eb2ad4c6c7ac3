//! The engine actor: sole owner of the registry, focus resolver and viewer list.
//!
//! Ingestion tasks, viewer tasks and the focus watcher reach it only through
//! [`EngineHandle`], which wraps a bounded command channel. Commands are applied
//! one at a time, so every transition and the messages it produces are observed
//! atomically by viewers.

use chrono::{DateTime, Utc};
use jacques_protocol::{EventEnvelope, IngestEvent, ServerMessage, Session};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::broadcast::{Broadcaster, ClientId, ClientQueue, Frame};
use crate::error::DaemonError;
use crate::focus::FocusResolver;
use crate::registry::{Registry, RegistryChange};
use crate::settings::AutoCompactToggle;

pub enum Command {
    Ingest(EventEnvelope),
    Control {
        client_id: ClientId,
        command: ViewerCommand,
    },
    Connect {
        respond_to: oneshot::Sender<Subscription>,
    },
    Disconnect {
        client_id: ClientId,
    },
    AutocompactToggled {
        toggle: AutoCompactToggle,
        session_id: Option<String>,
    },
    Snapshot {
        respond_to: oneshot::Sender<Snapshot>,
    },
}

/// Viewer requests the engine acts on. Auto-compact toggles never get here:
/// the gateway performs the settings IO and reports the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerCommand {
    Select { session_id: String },
    TriggerAction { session_id: String, action: String },
}

/// A registered viewer: its id, the queue its writer drains, and a signal that
/// resolves once the engine drops it.
#[derive(Debug)]
pub struct Subscription {
    pub client_id: ClientId,
    pub frames: mpsc::Receiver<Frame>,
    pub closed: oneshot::Receiver<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub sessions: Vec<Session>,
    pub focused_session_id: Option<String>,
    pub client_count: usize,
}

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    /// Forwards a decoded event, waiting for channel capacity.
    pub async fn ingest(&self, envelope: EventEnvelope) -> Result<(), DaemonError> {
        self.send(Command::Ingest(envelope)).await
    }

    pub async fn connect(&self) -> Result<Subscription, DaemonError> {
        let (respond_to, rx) = oneshot::channel();
        self.send(Command::Connect { respond_to }).await?;
        rx.await.map_err(|_| DaemonError::EngineStopped)
    }

    pub async fn disconnect(&self, client_id: ClientId) {
        let _ = self.send(Command::Disconnect { client_id }).await;
    }

    pub async fn control(
        &self,
        client_id: ClientId,
        command: ViewerCommand,
    ) -> Result<(), DaemonError> {
        self.send(Command::Control { client_id, command }).await
    }

    pub async fn autocompact_toggled(
        &self,
        toggle: AutoCompactToggle,
        session_id: Option<String>,
    ) -> Result<(), DaemonError> {
        self.send(Command::AutocompactToggled { toggle, session_id })
            .await
    }

    pub async fn snapshot(&self) -> Result<Snapshot, DaemonError> {
        let (respond_to, rx) = oneshot::channel();
        self.send(Command::Snapshot { respond_to }).await?;
        rx.await.map_err(|_| DaemonError::EngineStopped)
    }

    async fn send(&self, command: Command) -> Result<(), DaemonError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| DaemonError::EngineStopped)
    }
}

pub struct Engine {
    registry: Registry,
    focus: FocusResolver,
    broadcaster: Broadcaster,
}

impl Engine {
    pub fn new(client_queue_capacity: usize) -> Self {
        Self {
            registry: Registry::new(),
            focus: FocusResolver::new(),
            broadcaster: Broadcaster::new(client_queue_capacity),
        }
    }

    /// Moves the engine onto its own task and returns the handle used to reach it.
    pub fn spawn(self, command_queue_capacity: usize) -> (EngineHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(command_queue_capacity.max(1));
        let task = tokio::spawn(self.run(rx));
        (EngineHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!("Engine started");
        while let Some(command) = rx.recv().await {
            self.handle(command, Utc::now());
        }
        info!(sessions = self.registry.len(), "Engine stopped");
    }

    fn handle(&mut self, command: Command, now: DateTime<Utc>) {
        match command {
            Command::Ingest(envelope) => {
                let messages = self.apply_event(&envelope.event, now);
                self.broadcast_all(&messages);
            }
            Command::Control { client_id, command } => {
                self.handle_control(client_id, command, now);
            }
            Command::Connect { respond_to } => {
                let (client_id, ClientQueue { frames, closed }) = self.broadcaster.register();
                let initial = self.initial_state();
                self.broadcaster.send_to(client_id, &initial);
                info!(
                    client_id,
                    sessions = self.registry.len(),
                    clients = self.broadcaster.len(),
                    "Viewer connected"
                );
                if respond_to
                    .send(Subscription {
                        client_id,
                        frames,
                        closed,
                    })
                    .is_err()
                {
                    self.broadcaster.remove(client_id);
                }
            }
            Command::Disconnect { client_id } => {
                if self.broadcaster.remove(client_id) {
                    info!(client_id, clients = self.broadcaster.len(), "Viewer disconnected");
                }
            }
            Command::AutocompactToggled { toggle, session_id } => {
                let message = ServerMessage::AutocompactToggled {
                    enabled: toggle.enabled,
                    threshold: toggle.threshold,
                    bug_threshold: toggle.bug_threshold,
                    warning: toggle.warning,
                    session_id,
                };
                self.broadcast_all(&[message]);
            }
            Command::Snapshot { respond_to } => {
                let _ = respond_to.send(Snapshot {
                    sessions: self.registry.snapshot(),
                    focused_session_id: self.focus.current().map(str::to_string),
                    client_count: self.broadcaster.len(),
                });
            }
        }
    }

    /// Applies one event and returns what viewers must hear, in order:
    /// session updates or removals first, then any focus change.
    pub fn apply_event(&mut self, event: &IngestEvent, now: DateTime<Utc>) -> Vec<ServerMessage> {
        let changes = self.registry.apply(event, now);
        if changes.is_empty() {
            debug!(kind = event.kind(), "Event produced no change");
            return Vec::new();
        }

        let mut messages: Vec<ServerMessage> = changes
            .into_iter()
            .map(|change| match change {
                RegistryChange::Updated(session) => ServerMessage::SessionUpdate { session },
                RegistryChange::Removed(session_id) => ServerMessage::SessionRemoved { session_id },
            })
            .collect();
        messages.extend(self.recompute_focus());
        messages
    }

    fn handle_control(&mut self, client_id: ClientId, command: ViewerCommand, now: DateTime<Utc>) {
        if !self.broadcaster.contains(client_id) {
            debug!(client_id, "Request from a dropped viewer ignored");
            return;
        }
        match command {
            ViewerCommand::Select { session_id } => {
                let Some(session) = self.registry.select(&session_id, now) else {
                    debug!(client_id, session_id = %session_id, "Select for unknown session ignored");
                    return;
                };
                let mut messages = vec![ServerMessage::SessionUpdate { session }];
                messages.extend(self.recompute_focus());
                self.broadcast_all(&messages);
            }
            ViewerCommand::TriggerAction { session_id, action } => {
                let known = self.registry.get(&session_id).is_some();
                info!(client_id, session_id = %session_id, action = %action, accepted = known, "Action requested");
                let ack = ServerMessage::ActionAcknowledged {
                    session_id,
                    action,
                    accepted: known,
                    reason: (!known).then(|| "unknown_session".to_string()),
                };
                self.broadcaster.send_to(client_id, &ack);
            }
        }
    }

    fn recompute_focus(&mut self) -> Option<ServerMessage> {
        let change = self.focus.recompute(self.registry.sessions())?;
        let session = change
            .session_id
            .as_deref()
            .and_then(|id| self.registry.get(id))
            .cloned();
        Some(ServerMessage::FocusChanged {
            session_id: change.session_id,
            session,
        })
    }

    fn initial_state(&self) -> ServerMessage {
        ServerMessage::InitialState {
            sessions: self.registry.snapshot(),
            focused_session_id: self.focus.current().map(str::to_string),
        }
    }

    fn broadcast_all(&mut self, messages: &[ServerMessage]) {
        for message in messages {
            let dropped = self.broadcaster.broadcast(message);
            if !dropped.is_empty() {
                info!(dropped = dropped.len(), clients = self.broadcaster.len(), "Dropped slow viewers");
            }
        }
    }
}
