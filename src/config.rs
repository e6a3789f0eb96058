//! Transport configuration.

use serde::{Deserialize, Serialize};

/// Options for the underlying pub/sub connection.
///
/// The defaults match a broker listening on `localhost:9009` with a gently
/// backing-off reconnection policy. Reconnection itself is the transport's
/// concern; the policy is only carried here so the application can configure
/// it in one place.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub auto_reconnect: ReconnectOptions,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 9009,
            auto_reconnect: ReconnectOptions::default(),
        }
    }
}

/// Reconnection backoff policy handed to the transport.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReconnectOptions {
    /// Random jitter added to each delay, in milliseconds.
    pub randomness_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Upper bound on the delay between attempts, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            randomness_ms: 1000,
            multiplier: 1.5,
            max_delay_ms: 7000,
        }
    }
}
