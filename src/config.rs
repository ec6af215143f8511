//! Channel configuration
//!
//! A [`ChannelConfig`] is supplied once per channel and is immutable for the
//! channel's lifetime. Invalid values fail construction immediately; nothing
//! downstream has to re-validate.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Reconnection and heartbeat tuning for one channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Maximum number of scheduled reconnect attempts before the channel
    /// gives up and transitions to `Failed`.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds. Must be > 0.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on the backoff delay, jitter included. Must be >= base.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Heartbeat probe interval in milliseconds; 0 disables the heartbeat.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// How long to wait for a heartbeat acknowledgment before the channel is
    /// presumed dead. Must be > 0.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    5_000
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

impl ChannelConfig {
    /// Validate field constraints. Called at channel construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "base_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if self.heartbeat_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "heartbeat_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the heartbeat protocol is enabled at all.
    pub fn heartbeat_enabled(&self) -> bool {
        self.heartbeat_interval_ms > 0
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// Construction parameters for one logical channel (one room join).
///
/// The auth token rides in a transport-level subprotocol field, never in the
/// URL path, so it does not leak into server access logs.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Room identifier; scopes the channel endpoint.
    pub room_id: String,
    /// Display label used in log lines only.
    pub label: String,
    /// Server base URL, e.g. `wss://play.example.net`.
    pub server_url: String,
    /// Auth credential. `connect()` fails fast when absent.
    pub auth_token: Option<String>,
    pub config: ChannelConfig,
}

impl ChannelOptions {
    pub fn new(room_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        let room_id = room_id.into();
        Self {
            label: room_id.clone(),
            room_id,
            server_url: server_url.into(),
            auth_token: None,
            config: ChannelConfig::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }
}

/// Configuration validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ChannelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.base_delay_ms, 1_000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(config.heartbeat_timeout_ms, 5_000);
    }

    #[test]
    fn test_zero_base_delay_rejected() {
        let config = ChannelConfig {
            base_delay_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_delay_below_base_rejected() {
        let config = ChannelConfig {
            base_delay_ms: 5_000,
            max_delay_ms: 1_000,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_delay_ms"));
    }

    #[test]
    fn test_zero_heartbeat_timeout_rejected() {
        let config = ChannelConfig {
            heartbeat_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_heartbeat_interval_disables_heartbeat() {
        let config = ChannelConfig {
            heartbeat_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(!config.heartbeat_enabled());
    }

    #[test]
    fn test_options_builder() {
        let options = ChannelOptions::new("room-9", "wss://play.example.net")
            .with_label("table nine")
            .with_auth_token("tok");
        assert_eq!(options.room_id, "room-9");
        assert_eq!(options.label, "table nine");
        assert_eq!(options.auth_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_label_defaults_to_room_id() {
        let options = ChannelOptions::new("room-1", "wss://x");
        assert_eq!(options.label, "room-1");
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: ChannelConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ChannelConfig::default());
    }
}
