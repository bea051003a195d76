// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::bus::BusStatus;

#[derive(Error, Debug)]
pub enum DtexecError {
    /// Bad command line; the binary prints usage and exits with `exit_code`.
    #[error("usage error (exit code {exit_code})")]
    Usage { exit_code: i32 },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    #[error("Messaging bus error: {0}")]
    Bus(#[from] BusStatus),

    #[error("Wall clock unavailable: {0}")]
    Clock(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Errno(#[from] nix::errno::Errno),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DtexecError>;
