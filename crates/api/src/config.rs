//! Application configuration

use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database (in-memory store when unset)
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub run_migrations: bool,

    // WebSocket
    pub ws: WsSettings,
}

/// Smallest message the WebSocket layer accepts before it ends the socket
pub const PROTOCOL_FLOOR_BYTES: usize = 64 * 1024;

/// Per-connection WebSocket tunables
///
/// Two size limits apply to inbound messages. Chat frames above
/// `max_frame_bytes` are dropped with a warning and the socket stays open.
/// Messages above [`WsSettings::max_message_bytes`] are refused by the
/// WebSocket layer itself, which ends the socket. That hard limit is
/// `PROTOCOL_FLOOR_BYTES` or `max_frame_bytes`, whichever is larger, so
/// raising `WS_MAX_FRAME_BYTES` always takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsSettings {
    /// Inbound frames larger than this are dropped
    pub max_frame_bytes: usize,
    /// Time allowed between pongs before the peer is considered dead
    pub pong_wait: Duration,
    /// Idle time after which the writer sends a ping; must be below `pong_wait`
    pub ping_period: Duration,
    /// Time allowed for a single frame write
    pub write_wait: Duration,
    /// Capacity of each connection's outbound queue
    pub outbound_queue: usize,
}

impl WsSettings {
    /// Hard per-message ceiling handed to the WebSocket upgrade
    pub fn max_message_bytes(&self) -> usize {
        self.max_frame_bytes.max(PROTOCOL_FLOOR_BYTES)
    }

    pub fn with_pong_wait(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            ..Self::default()
        }
    }
}

impl Default for WsSettings {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            max_frame_bytes: 512,
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(10),
            outbound_queue: 256,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            database_url: None,
            database_max_connections: 10,
            run_migrations: true,
            ws: WsSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = WsSettings::default();

        let pong_wait_secs: u64 = env::var("WS_PONG_WAIT_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);
        if pong_wait_secs == 0 {
            return Err(ConfigError::Invalid("WS_PONG_WAIT_SECS must be greater than zero"));
        }

        let outbound_queue: usize = env::var("WS_OUTBOUND_QUEUE")
            .unwrap_or_else(|_| defaults.outbound_queue.to_string())
            .parse()
            .unwrap_or(defaults.outbound_queue);
        if outbound_queue == 0 {
            return Err(ConfigError::Invalid("WS_OUTBOUND_QUEUE must be greater than zero"));
        }

        let write_wait_secs: u64 = env::var("WS_WRITE_WAIT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        if write_wait_secs == 0 {
            return Err(ConfigError::Invalid("WS_WRITE_WAIT_SECS must be greater than zero"));
        }

        let ws = WsSettings {
            max_frame_bytes: env::var("WS_MAX_FRAME_BYTES")
                .unwrap_or_else(|_| defaults.max_frame_bytes.to_string())
                .parse()
                .unwrap_or(defaults.max_frame_bytes),
            write_wait: Duration::from_secs(write_wait_secs),
            outbound_queue,
            ..WsSettings::with_pong_wait(Duration::from_secs(pong_wait_secs))
        };

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),

            // Database
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            run_migrations: env::var("RUN_MIGRATIONS")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            // WebSocket
            ws,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
