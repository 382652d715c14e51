// ================================
// src/error.rs - error taxonomy
// ================================
use thiserror::Error;

use crate::node::AgentId;

/// Errors surfaced by chain construction, spawning and configuration.
///
/// A follower without a leader pose is not an error; it simply emits nothing.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("{name} must be a positive finite number, got {value}")]
    InvalidGain { name: &'static str, value: f64 },

    #[error("arrival radius must be a positive finite number, got {0}")]
    InvalidArrivalRadius(f64),

    #[error("spawn region [{min}, {max}) is empty or not finite")]
    InvalidSpawnRegion { min: f64, max: f64 },

    #[error("simulator {name} must be a positive finite number, got {value}")]
    InvalidSimParam { name: &'static str, value: f64 },

    #[error("chain needs at least one agent")]
    EmptyChain,

    #[error("agent {0} appears more than once in the chain")]
    DuplicateAgent(AgentId),

    #[error("failed to spawn {agent}: {reason}")]
    SpawnFailed { agent: AgentId, reason: String },

    #[error("service {service} still unavailable after {attempts} attempts")]
    ServiceUnavailable { service: String, attempts: u32 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl ChainError {
    /// True for the failures that leave a single agent dormant instead of
    /// stopping the process.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(
            self,
            ChainError::SpawnFailed { .. } | ChainError::ServiceUnavailable { .. }
        )
    }
}
