//! Channel layer: connection state machine and its collaborators
//!
//! This module provides the transport abstraction and the components built on
//! top of it: backoff scheduling, heartbeat liveness, reconnect signals,
//! timer tokens, the message dispatcher, and the supervising state machine.

use crate::config::ChannelOptions;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub mod backoff;
pub mod client;
pub mod dispatcher;
pub mod liveness;
pub mod signals;
pub mod timers;
pub mod websocket;

/// Authoritative connection state. Exactly one value holds at any instant;
/// transitions happen only inside the channel's supervisor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A transport open is in flight.
    Connecting,
    /// Transport open and ready for sends.
    Connected,
    /// No transport. Initial state, and terminal after a manual close.
    Disconnected,
    /// A scheduled reconnect timer is pending.
    Reconnecting,
    /// Retry budget exhausted or credential missing; terminal until an
    /// explicit `connect()` call.
    Failed,
}

/// Events surfaced by a transport's reader half.
///
/// The reader guarantees that an `Error` is always followed by a `Closed`
/// event; errors are informational and the close is authoritative for
/// reconnection decisions.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A complete inbound text frame.
    Frame(String),
    /// The socket closed. `code` is the close code when one was received.
    Closed { code: Option<u16>, reason: String },
    /// Transport-level error; logged only.
    Error(String),
}

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("socket is closed")]
    Closed,
}

/// Write half of an open channel transport.
///
/// Exclusively owned by one channel supervisor; nothing else holds or
/// mutates it.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Send one text frame. Fails when the socket is no longer open.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Best-effort normal closure. Idempotent.
    async fn close(&mut self);

    /// Liveness flag maintained by the reader half. Turns false as soon as a
    /// close or error is observed, which may be before any event is
    /// delivered - this is how half-open sockets are detected.
    fn is_open(&self) -> bool;
}

/// Opens transports. One implementation per target environment; the state
/// machine itself stays portable.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to the room's channel endpoint. Inbound events are
    /// pushed into `events` by a reader task until the socket dies.
    async fn open(
        &self,
        options: &ChannelOptions,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Log a connection state transition (diagnostic only; the format is not
/// part of the contract).
pub(crate) fn log_state_transition(label: &str, from: ConnectionState, to: ConnectionState) {
    match (from, to) {
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!(room = %label, "channel connected");
        }
        (ConnectionState::Connected, ConnectionState::Disconnected) => {
            warn!(room = %label, "channel connection lost");
        }
        (_, ConnectionState::Reconnecting) => {
            info!(room = %label, "channel waiting to reconnect");
        }
        (ConnectionState::Reconnecting, ConnectionState::Connecting) => {
            info!(room = %label, "reconnect attempt starting");
        }
        (_, ConnectionState::Failed) => {
            error!(room = %label, "channel permanently failed");
        }
        _ => {
            info!(room = %label, "channel state: {:?} -> {:?}", from, to);
        }
    }
}
