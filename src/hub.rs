//! Notification fan-out across both transports
//!
//! The hub unifies two delivery paths behind one broadcast surface: connected
//! interactive sockets get formatted text pushed immediately, and queued
//! long-poll responders each get exactly one JSON payload before being
//! removed from the queue. Requests arriving after an event simply queue for
//! the next one.

use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

/// Commands delivered to an interactive connection's task.
#[derive(Debug)]
pub enum ClientCommand {
    /// Write one line to the socket.
    Line(String),
    /// Shut the connection down (kick).
    Shutdown,
}

/// Capability handle the engine holds for a connected participant. One
/// concrete type per transport kind; the session and hub depend only on
/// this interface.
pub trait Transport: Send {
    /// Queues one line of text. Fire-and-forget: a dead peer is logged and
    /// never blocks delivery to other players.
    fn send(&self, line: &str);
    /// Asks the connection to close.
    fn close(&self);
    fn identity(&self) -> &str;
}

/// Persistent line-oriented TCP connection, backed by the channel into the
/// connection's task.
pub struct InteractiveTransport {
    id: String,
    tx: mpsc::UnboundedSender<ClientCommand>,
}

impl InteractiveTransport {
    pub fn new(id: String, tx: mpsc::UnboundedSender<ClientCommand>) -> Self {
        Self { id, tx }
    }
}

impl Transport for InteractiveTransport {
    fn send(&self, line: &str) {
        if self.tx.send(ClientCommand::Line(line.to_string())).is_err() {
            warn!("{} - write to closed connection dropped", self.id);
        }
    }

    fn close(&self) {
        let _ = self.tx.send(ClientCommand::Shutdown);
    }

    fn identity(&self) -> &str {
        &self.id
    }
}

/// Long-polling client. Text pushes are no-ops; polled players only see
/// state through the responder queue.
pub struct PolledTransport {
    id: String,
}

impl PolledTransport {
    pub fn new(id: String) -> Self {
        Self { id }
    }
}

impl Transport for PolledTransport {
    fn send(&self, _line: &str) {}

    fn close(&self) {}

    fn identity(&self) -> &str {
        &self.id
    }
}

/// Fan-out of round-state change events to every connected adapter.
#[derive(Default)]
pub struct NotificationHub {
    transports: HashMap<String, Box<dyn Transport>>,
    pending: Vec<oneshot::Sender<Value>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the transport for a player id.
    pub fn attach(&mut self, transport: Box<dyn Transport>) {
        self.transports
            .insert(transport.identity().to_string(), transport);
    }

    pub fn detach(&mut self, id: &str) {
        self.transports.remove(id);
    }

    /// Closes a player's connection and forgets the transport.
    pub fn close(&mut self, id: &str) {
        if let Some(transport) = self.transports.remove(id) {
            transport.close();
        }
    }

    pub fn send_to(&self, id: &str, line: &str) {
        if let Some(transport) = self.transports.get(id) {
            transport.send(line);
        }
    }

    /// Pushes one line to every connected transport. Polled transports
    /// ignore it, so this reaches exactly the interactive players.
    pub fn broadcast_line(&self, line: &str) {
        for transport in self.transports.values() {
            transport.send(line);
        }
    }

    /// Queues a long-poll responder for the next broadcast event. Responders
    /// whose client already disconnected are reaped here, so a retry loop
    /// cannot grow the queue between events.
    pub fn enqueue_responder(&mut self, responder: oneshot::Sender<Value>) {
        self.pending.retain(|r| !r.is_closed());
        self.pending.push(responder);
    }

    /// Resolves every queued responder with one payload and empties the
    /// queue. A responder whose client already disconnected is dropped with
    /// a debug log; it never survives into the next event.
    pub fn resolve_responders(&mut self, payload: &Value) {
        let drained = std::mem::take(&mut self.pending);
        let count = drained.len();
        for responder in drained {
            if responder.send(payload.clone()).is_err() {
                debug!("long-poll client went away before the event fired");
            }
        }
        if count > 0 {
            debug!("resolved {} long-poll responders", count);
        }
    }

    pub fn pending_responders(&self) -> usize {
        self.pending.len()
    }
}
