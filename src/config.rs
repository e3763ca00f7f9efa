//! Engine configuration.
//!
//! Capacities and connection settings, with sane defaults. Loadable from a
//! TOML file; the CLI layers flag / environment overrides on top.

use crate::error::StreamQlError;
use serde::Deserialize;
use std::path::Path;

/// Default capacity of each filter / projection output channel.
pub const DEFAULT_FILTER_BUFFER: usize = 50;

/// Default capacity of the join's output channel.
pub const DEFAULT_JOIN_BUFFER: usize = 512;

/// Default capacity of the error sink channel.
pub const DEFAULT_ERROR_BUFFER: usize = 16;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// NATS server URL.
    pub nats_url: String,
    /// Bounded capacity of filter and projection output channels.
    pub filter_buffer: usize,
    /// Bounded capacity of the join output channel.
    pub join_buffer: usize,
    /// Bounded capacity of the error sink.
    pub error_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://127.0.0.1:4222".to_string(),
            filter_buffer: DEFAULT_FILTER_BUFFER,
            join_buffer: DEFAULT_JOIN_BUFFER,
            error_buffer: DEFAULT_ERROR_BUFFER,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file. Missing keys fall back to defaults; unknown
    /// keys are an error so typos don't silently configure nothing.
    pub fn from_file(path: &Path) -> Result<Self, StreamQlError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StreamQlError::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| StreamQlError::Config(format!("{}: {e}", path.display())))
    }
}
