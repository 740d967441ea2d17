//! Beliefnet error types.
//!
//! # Error Classification
//!
//! Errors fall into three groups by how the simulation loop treats them:
//!
//! - **Fatal at startup**: `Configuration` (bad topology/agent-count combination,
//!   empty belief pool, zero rounds).
//! - **Invariant violations**: `InvalidAgent`, `IsolatedAgent`, `ProtocolViolation`.
//!   These never occur with a validated configuration; if they do the run aborts.
//! - **Recoverable**: `Conversation` (collaborator exhausted its retry budget) skips
//!   the iteration, `DecisionParse` defaults to "no change". Both are recorded in the
//!   event log so a replay can tell them apart from a defender that chose not to update.

use thiserror::Error;

use crate::registry::AgentId;

/// Simulation errors.
#[derive(Error, Debug)]
pub enum SimError {
    /// Invalid configuration (topology, agent count, rounds, belief pool).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Agent id not present in the topology or registry.
    #[error("Invalid agent: {0}")]
    InvalidAgent(AgentId),

    /// Agent selected for an interaction has no neighbors.
    #[error("Isolated agent: {0} has no neighbors")]
    IsolatedAgent(AgentId),

    /// The collaborator failed on every attempt for one request.
    #[error("Conversation error after {attempts} attempts: {last_error}")]
    Conversation {
        /// Number of attempts made
        attempts: u32,
        /// The last error message
        last_error: String,
    },

    /// The collaborator's final decision reply could not be interpreted.
    #[error("Decision parse error: {0}")]
    DecisionParse(String),

    /// The collaborator backend returned an error.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A single collaborator request exceeded its timeout.
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// A conversation or simulation state machine was driven out of order.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Persisted log cannot be replayed.
    #[error("Replay error: {0}")]
    Replay(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Whether the simulation loop must abort on this error.
    ///
    /// `Conversation`, `Backend`, `Timeout` and `DecisionParse` are recovered at
    /// the interaction level; everything else ends the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SimError::Conversation { .. }
                | SimError::Backend(_)
                | SimError::Timeout(_)
                | SimError::DecisionParse(_)
        )
    }
}

/// Result type alias for simulation operations
pub type Result<T> = std::result::Result<T, SimError>;

impl From<reqwest::Error> for SimError {
    fn from(err: reqwest::Error) -> Self {
        SimError::Backend(err.to_string())
    }
}

impl From<toml::de::Error> for SimError {
    fn from(err: toml::de::Error) -> Self {
        SimError::Configuration(format!("Failed to parse config: {err}"))
    }
}
