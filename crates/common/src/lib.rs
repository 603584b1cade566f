//! Common utilities and types shared across the mesh rooms components.

#![warn(clippy::pedantic)]

/// Module for identifier newtypes
pub mod types;

/// Module for environment configuration helpers
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
