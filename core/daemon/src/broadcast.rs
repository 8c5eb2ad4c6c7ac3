//! Fan-out of server messages to connected viewers.
//!
//! Each viewer gets a bounded queue drained by its own writer task. Messages are
//! serialized once and shared. A viewer whose queue is full (or whose writer has
//! gone away) is dropped from the client list. Dropping it closes the queue and
//! fires its close signal, so the connection task tears the socket down even if
//! its writer is stuck on a peer that stopped reading. Other viewers are never
//! delayed.

use jacques_protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

pub type ClientId = u64;

/// Serialized frame shared by every client queue.
pub type Frame = Arc<str>;

/// Receiving side of one viewer registration.
#[derive(Debug)]
pub struct ClientQueue {
    pub frames: mpsc::Receiver<Frame>,
    /// Resolves once the broadcaster drops this client.
    pub closed: oneshot::Receiver<()>,
}

#[derive(Debug)]
struct ClientSlot {
    frames: mpsc::Sender<Frame>,
    _close: oneshot::Sender<()>,
}

#[derive(Debug)]
pub struct Broadcaster {
    clients: HashMap<ClientId, ClientSlot>,
    next_id: ClientId,
    queue_capacity: usize,
}

impl Broadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_id: 1,
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.clients.contains_key(&client_id)
    }

    pub fn register(&mut self) -> (ClientId, ClientQueue) {
        let id = self.next_id;
        self.next_id += 1;
        let (frames_tx, frames) = mpsc::channel(self.queue_capacity);
        let (close, closed) = oneshot::channel();
        self.clients.insert(
            id,
            ClientSlot {
                frames: frames_tx,
                _close: close,
            },
        );
        (id, ClientQueue { frames, closed })
    }

    pub fn remove(&mut self, client_id: ClientId) -> bool {
        self.clients.remove(&client_id).is_some()
    }

    /// Sends `message` to every client. Returns the ids that were dropped.
    pub fn broadcast(&mut self, message: &ServerMessage) -> Vec<ClientId> {
        let Some(frame) = encode(message) else {
            return Vec::new();
        };

        let mut dropped = Vec::new();
        for (client_id, slot) in &self.clients {
            if !deliver(*client_id, &slot.frames, &frame, message.kind()) {
                dropped.push(*client_id);
            }
        }
        for client_id in &dropped {
            self.clients.remove(client_id);
        }
        dropped
    }

    /// Sends `message` to one client. Returns false if the client was dropped or unknown.
    pub fn send_to(&mut self, client_id: ClientId, message: &ServerMessage) -> bool {
        let Some(frame) = encode(message) else {
            return false;
        };
        let Some(slot) = self.clients.get(&client_id) else {
            return false;
        };
        if deliver(client_id, &slot.frames, &frame, message.kind()) {
            true
        } else {
            self.clients.remove(&client_id);
            false
        }
    }
}

fn encode(message: &ServerMessage) -> Option<Frame> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::from(json)),
        Err(err) => {
            error!(error = %err, kind = message.kind(), "Failed to serialize server message");
            None
        }
    }
}

fn deliver(client_id: ClientId, tx: &mpsc::Sender<Frame>, frame: &Frame, kind: &str) -> bool {
    match tx.try_send(Arc::clone(frame)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(client_id, kind, "Viewer queue full; disconnecting slow client");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(client_id, "Viewer writer gone; removing client");
            false
        }
    }
}
