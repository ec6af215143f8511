//! roomlink - resilient room channel client
//!
//! This crate maintains a single persistent, bidirectional message channel
//! between a client and a stateful multiplayer room server, and routes typed
//! messages arriving on that channel to independent, decoupled consumers.
//!
//! # Overview
//!
//! - Connection state machine ([`RoomChannel`]) owning the transport handle,
//!   with jittered exponential backoff and a bounded retry budget
//! - Application-level heartbeat that detects half-open sockets (channels
//!   which report "open" but are actually dead)
//! - External reconnect signals that short-circuit a pending backoff timer
//! - Message dispatcher with a primary handler plus removable secondary
//!   listeners
//! - Pluggable transport seam: WebSocket in production, in-memory fakes in
//!   tests
//!
//! # Quick Start
//!
//! ```rust
//! use roomlink::{ChannelConfig, ChannelOptions, Envelope};
//! use serde_json::json;
//!
//! // Defaults: 10 attempts, 1s base delay, 30s cap, 30s heartbeat interval
//! let config = ChannelConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let options = ChannelOptions::new("room-42", "wss://play.example.net")
//!     .with_auth_token("session-token")
//!     .with_config(config);
//! assert_eq!(options.room_id, "room-42");
//!
//! // Envelopes are the typed message unit exchanged over the channel
//! let mut payload = serde_json::Map::new();
//! payload.insert("card".to_string(), json!(7));
//! let envelope = Envelope::application("play_card", payload);
//! let wire = envelope.encode().unwrap();
//! assert!(wire.contains("play_card"));
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod testing;

pub use channel::backoff::{retry_delay, RetryDecision};
pub use channel::client::{ChannelHealth, MessageCallback, RoomChannel, StateCallback};
pub use channel::dispatcher::{ListenerHandle, MessageDispatcher};
pub use channel::signals::{ManualSignalSource, ReconnectSignal, SignalSource};
pub use channel::websocket::WebSocketConnector;
pub use channel::{ConnectionState, Connector, Transport, TransportError, TransportEvent};
pub use config::{ChannelConfig, ChannelOptions, ConfigError};
pub use error::{ChannelError, ChannelResult};
pub use protocol::{Envelope, EnvelopeMeta, HEARTBEAT, HEARTBEAT_ACK};
