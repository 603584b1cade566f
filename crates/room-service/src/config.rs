//! Room service configuration.
//!
//! Configuration is loaded from environment variables. Every field has a
//! default so the service starts with an empty environment.

use common::config::{parse_or, parse_positive_or, ConfigError};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default chat history capacity per room.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Default lifetime of a room that was created but never joined.
pub const DEFAULT_EMPTY_ROOM_TTL_SECONDS: u64 = 300;

/// Default per-room mailbox capacity.
pub const DEFAULT_ROOM_MAILBOX_CAPACITY: usize = 256;

/// Default HTTP request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Default time allowed for room actors to drain on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 10;

/// Room service configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Chat entries retained per room; oldest evicted first.
    pub history_capacity: usize,

    /// How long an unjoined room survives before it is reaped.
    pub empty_room_ttl: Duration,

    /// Bounded mailbox size of each room actor.
    pub room_mailbox_capacity: usize,

    /// Per-request timeout applied by the HTTP stack.
    pub request_timeout: Duration,

    /// When false, unlocked rooms accept any secret at verify/join.
    pub require_secret_when_unlocked: bool,

    /// Deadline for room actors to stop during shutdown.
    pub shutdown_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("history_capacity", &self.history_capacity)
            .field("empty_room_ttl", &self.empty_room_ttl)
            .field("room_mailbox_capacity", &self.room_mailbox_capacity)
            .field("request_timeout", &self.request_timeout)
            .field(
                "require_secret_when_unlocked",
                &self.require_secret_when_unlocked,
            )
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            empty_room_ttl: Duration::from_secs(DEFAULT_EMPTY_ROOM_TTL_SECONDS),
            room_mailbox_capacity: DEFAULT_ROOM_MAILBOX_CAPACITY,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            require_secret_when_unlocked: true,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let history_capacity = usize::try_from(parse_positive_or(
            vars,
            "HISTORY_CAPACITY",
            DEFAULT_HISTORY_CAPACITY as u64,
        )?)
        .map_err(|e| ConfigError::InvalidValue {
            name: "HISTORY_CAPACITY".to_string(),
            reason: e.to_string(),
        })?;

        let empty_room_ttl = Duration::from_secs(parse_positive_or(
            vars,
            "EMPTY_ROOM_TTL_SECONDS",
            DEFAULT_EMPTY_ROOM_TTL_SECONDS,
        )?);

        let room_mailbox_capacity = usize::try_from(parse_positive_or(
            vars,
            "ROOM_MAILBOX_CAPACITY",
            DEFAULT_ROOM_MAILBOX_CAPACITY as u64,
        )?)
        .map_err(|e| ConfigError::InvalidValue {
            name: "ROOM_MAILBOX_CAPACITY".to_string(),
            reason: e.to_string(),
        })?;

        let request_timeout = Duration::from_secs(parse_positive_or(
            vars,
            "REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?);

        let require_secret_when_unlocked =
            parse_or(vars, "REQUIRE_SECRET_WHEN_UNLOCKED", true)?;

        let shutdown_timeout = Duration::from_secs(parse_or(
            vars,
            "SHUTDOWN_TIMEOUT_SECONDS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        )?);

        Ok(Self {
            bind_address,
            history_capacity,
            empty_room_ttl,
            room_mailbox_capacity,
            request_timeout,
            require_secret_when_unlocked,
            shutdown_timeout,
        })
    }
}
