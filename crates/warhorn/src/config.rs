//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::WarhornError;

/// Configuration for a [`Client`](crate::Client).
///
/// Set it on [`ClientBuilder`](crate::ClientBuilder) directly, or load it
/// from a JSON file with [`ClientConfig::from_json`]. Missing fields take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// The game server, `ws://` or `wss://`.
    pub server_uri: String,

    /// How long `disconnect` waits for the close handshake before dropping
    /// the socket anyway.
    pub close_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_uri: "ws://127.0.0.1:8080".to_string(),
            close_timeout: Duration::from_secs(2),
        }
    }
}

impl ClientConfig {
    /// Parses a config from JSON.
    ///
    /// # Errors
    /// [`WarhornError::InvalidConfig`] if the JSON doesn't parse.
    pub fn from_json(json: &str) -> Result<Self, WarhornError> {
        serde_json::from_str(json)
            .map_err(|e| WarhornError::InvalidConfig(e.to_string()))
    }

    /// Checks the values are usable.
    ///
    /// # Errors
    /// [`WarhornError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<(), WarhornError> {
        let rest = self
            .server_uri
            .strip_prefix("ws://")
            .or_else(|| self.server_uri.strip_prefix("wss://"));
        match rest {
            Some(host) if !host.is_empty() => {}
            _ => {
                return Err(WarhornError::InvalidConfig(format!(
                    "server_uri must be ws:// or wss:// with a host, got {:?}",
                    self.server_uri
                )));
            }
        }
        if self.close_timeout.is_zero() {
            return Err(WarhornError::InvalidConfig(
                "close_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
