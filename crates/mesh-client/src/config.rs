//! Participant configuration.
//!
//! `ROOM_SERVICE_URL` is required when loading from the environment; every
//! other setting has a default. `ClientConfig::default()` points at a local
//! room service and is what tests start from.

use common::config::{parse_positive_or, required, ConfigError};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Room service URL used by `ClientConfig::default()`.
pub const DEFAULT_ROOM_SERVICE_URL: &str = "http://127.0.0.1:8080";

/// Default bound on opening one peer connection.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default file chunk size in bytes.
pub const DEFAULT_FILE_CHUNK_SIZE: usize = mesh_protocol::transfer::DEFAULT_CHUNK_SIZE;

/// Largest accepted chunk size. Chunks travel base64-encoded inside one
/// frame, so this keeps a chunk frame well under the frame limit.
pub const MAX_FILE_CHUNK_SIZE: usize = 256 * 1024;

/// Default delay before finished transfers disappear from progress views.
pub const DEFAULT_TRANSFER_GRACE_MS: u64 = 3_000;

/// Default number of consecutive bad messages tolerated on one connection.
pub const DEFAULT_MAX_PROTOCOL_VIOLATIONS: u32 = 5;

/// Default timeout of one room service HTTP call.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5_000;

/// Participant configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the room service, without a trailing slash.
    pub room_service_url: String,

    /// Abandon a peer connection attempt after this long.
    pub connect_timeout: Duration,

    /// Bytes per `file_chunk` message.
    pub file_chunk_size: usize,

    /// How long completed transfers stay visible to progress queries.
    pub transfer_grace: Duration,

    /// Consecutive protocol violations before a connection is closed.
    pub max_protocol_violations: u32,

    /// Where kicked-session bans are persisted. In memory only when `None`.
    pub ban_list_path: Option<PathBuf>,

    /// Timeout of each room service request.
    pub http_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            room_service_url: DEFAULT_ROOM_SERVICE_URL.to_string(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            file_chunk_size: DEFAULT_FILE_CHUNK_SIZE,
            transfer_grace: Duration::from_millis(DEFAULT_TRANSFER_GRACE_MS),
            max_protocol_violations: DEFAULT_MAX_PROTOCOL_VIOLATIONS,
            ban_list_path: None,
            http_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let room_service_url = required(vars, "ROOM_SERVICE_URL")?
            .trim_end_matches('/')
            .to_string();
        if !room_service_url.starts_with("http://") && !room_service_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                name: "ROOM_SERVICE_URL".to_string(),
                reason: "must be an http(s) URL".to_string(),
            });
        }

        let connect_timeout = Duration::from_millis(parse_positive_or(
            vars,
            "CONNECT_TIMEOUT_MS",
            DEFAULT_CONNECT_TIMEOUT_MS,
        )?);

        let file_chunk_size = usize::try_from(parse_positive_or(
            vars,
            "FILE_CHUNK_SIZE",
            DEFAULT_FILE_CHUNK_SIZE as u64,
        )?)
        .ok()
        .filter(|size| *size <= MAX_FILE_CHUNK_SIZE)
        .ok_or_else(|| ConfigError::InvalidValue {
            name: "FILE_CHUNK_SIZE".to_string(),
            reason: format!("must not exceed {MAX_FILE_CHUNK_SIZE} bytes"),
        })?;

        let transfer_grace = Duration::from_millis(parse_positive_or(
            vars,
            "TRANSFER_GRACE_MS",
            DEFAULT_TRANSFER_GRACE_MS,
        )?);

        let max_protocol_violations = u32::try_from(parse_positive_or(
            vars,
            "MAX_PROTOCOL_VIOLATIONS",
            u64::from(DEFAULT_MAX_PROTOCOL_VIOLATIONS),
        )?)
        .map_err(|e| ConfigError::InvalidValue {
            name: "MAX_PROTOCOL_VIOLATIONS".to_string(),
            reason: e.to_string(),
        })?;

        let ban_list_path = vars
            .get("BAN_LIST_PATH")
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let http_timeout = Duration::from_millis(parse_positive_or(
            vars,
            "HTTP_TIMEOUT_MS",
            DEFAULT_HTTP_TIMEOUT_MS,
        )?);

        Ok(Self {
            room_service_url,
            connect_timeout,
            file_chunk_size,
            transfer_grace,
            max_protocol_violations,
            ban_list_path,
            http_timeout,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_room_service_url_is_required() {
        let result = ClientConfig::from_vars(&HashMap::new());
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(name)) if name == "ROOM_SERVICE_URL")
        );
    }

    #[test]
    fn test_defaults_match_default_impl() {
        let config =
            ClientConfig::from_vars(&vars(&[("ROOM_SERVICE_URL", DEFAULT_ROOM_SERVICE_URL)]))
                .unwrap();
        let default = ClientConfig::default();

        assert_eq!(config.room_service_url, default.room_service_url);
        assert_eq!(config.connect_timeout, default.connect_timeout);
        assert_eq!(config.file_chunk_size, default.file_chunk_size);
        assert_eq!(config.transfer_grace, default.transfer_grace);
        assert_eq!(config.max_protocol_violations, default.max_protocol_violations);
        assert_eq!(config.ban_list_path, None);
        assert_eq!(config.http_timeout, default.http_timeout);
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let config =
            ClientConfig::from_vars(&vars(&[("ROOM_SERVICE_URL", "http://rooms.local:8080/")]))
                .unwrap();
        assert_eq!(config.room_service_url, "http://rooms.local:8080");
    }

    #[test]
    fn test_non_http_url_rejected() {
        let result = ClientConfig::from_vars(&vars(&[("ROOM_SERVICE_URL", "rooms.local")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_oversized_chunks_rejected() {
        let result = ClientConfig::from_vars(&vars(&[
            ("ROOM_SERVICE_URL", "http://localhost"),
            ("FILE_CHUNK_SIZE", "10000000"),
        ]));
        assert!(
            matches!(result, Err(ConfigError::InvalidValue { name, .. }) if name == "FILE_CHUNK_SIZE")
        );
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = ClientConfig::from_vars(&vars(&[
            ("ROOM_SERVICE_URL", "https://rooms.example"),
            ("CONNECT_TIMEOUT_MS", "250"),
            ("MAX_PROTOCOL_VIOLATIONS", "2"),
            ("BAN_LIST_PATH", "/tmp/bans.json"),
        ]))
        .unwrap();

        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.max_protocol_violations, 2);
        assert_eq!(config.ban_list_path, Some(PathBuf::from("/tmp/bans.json")));
    }
}
