//! Error types for room channel operations
//!
//! Setup errors (missing credential, invalid config) fail fast and are not
//! retried. Transient transport errors are handled internally by the
//! reconnection machinery and never surface here; only the terminal `Failed`
//! state is user-visible.

use crate::channel::TransportError;
use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for channel operations
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No auth credential was available when `connect()` was called.
    #[error("no auth credential available for room {room_id}")]
    MissingCredential { room_id: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The channel's supervisor task is gone (the channel was dropped).
    #[error("channel supervisor is no longer running")]
    SupervisorGone,
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;
