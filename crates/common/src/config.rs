//! Helpers for reading service configuration from environment variables.
//!
//! Services build their config from a `HashMap<String, String>` so tests can
//! pass explicit values instead of mutating the process environment.

use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Read an optional variable and parse it, falling back to `default` when absent.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] when the variable is present but does
/// not parse as `T`.
pub fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Like [`parse_or`], but additionally rejects zero.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] for unparseable or zero values.
pub fn parse_positive_or(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let value = parse_or(vars, name, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

/// Read a required variable.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnvVar`] when absent or blank.
pub fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}
