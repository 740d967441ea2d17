//! # Beliefnet - LLM-mediated belief propagation
//!
//! Agents on a network each hold a belief. Each iteration, two neighbors are
//! paired for a short debate that a language model conducts. Afterwards one of
//! them, the defender, may revise its belief. The crate is the deterministic
//! core around that: pair scheduling, role assignment, the conversation
//! protocol, belief updates and a replayable event log.
//!
//! ## Features
//!
//! - **Topologies**: grid-4, grid-8, ring, mesh (complete) and star networks
//! - **Reproducible runs**: one seeded generator drives every random choice
//! - **Pluggable collaborator**: Ollama, OpenAI-compatible endpoints, or a
//!   deterministic scripted backend
//! - **Fail-safe updates**: conversation failures skip the iteration; unreadable
//!   decisions count as "no change" and are flagged
//! - **Event log**: totally ordered, streamed to observers, persisted as JSON
//!   Lines plus a human-readable text log, replayable offline
//!
//! ## Iteration Flow
//!
//! ```text
//!  Topology ──> select_pair ──> assign_roles ──> ConversationDriver ──> UpdateEngine
//!                  (rng)           (rng)          Opening               decide()
//!                                                 Exchanging × R        apply()
//!                                                 Closed                   │
//!                                                                          v
//!                                   EventLog ──> sinks (JSONL, text) + broadcast
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use beliefnet::{DecisionScript, ScriptedBackend, Simulation, SimulationConfig};
//!
//! let mut config = SimulationConfig::default();
//! config.simulation.iterations = 10;
//!
//! let backend = Arc::new(ScriptedBackend::new(DecisionScript::Alternate));
//! let report = Simulation::new(config, backend)?.run().await?;
//! println!("change rate {:.1}%", report.summary.change_rate());
//! ```
//!
//! ## Replay
//!
//! ```rust,ignore
//! use beliefnet::Replay;
//!
//! let replay = Replay::from_path("logs/run.jsonl")?;
//! let interaction = replay.interaction(3)?;
//! assert_eq!(replay.final_beliefs()?, report.final_beliefs);
//! ```
//!
//! ## Modules
//!
//! - [`topology`]: network construction and neighbor lookup
//! - [`registry`]: agents and their current beliefs
//! - [`schedule`]: pair selection and role assignment
//! - [`conversation`]: the debate state machine and driver
//! - [`update`]: decision interpretation and application
//! - [`events`]: event log, sinks and replay
//! - [`simulation`]: the iteration loop
//! - [`backend`]: LLM collaborators
//! - [`present`]: console rendering of the event stream
//! - [`config`]: configuration management
//! - [`error`]: error types and result aliases

pub mod backend;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod present;
pub mod registry;
pub mod schedule;
pub mod simulation;
pub mod topology;
pub mod update;

// Re-exports for convenience
pub use backend::{
    Collaborator, DecisionRequest, DecisionScript, Provider, ScriptedBackend, UtteranceRequest,
};
pub use config::SimulationConfig;
pub use conversation::{Conversation, ConversationContext, ConversationState, Transcript, Utterance};
pub use error::{Result, SimError};
pub use events::{EventLog, LogRecord, Replay, RunSummary, SimEvent};
pub use registry::{Agent, AgentId, AgentRegistry};
pub use schedule::{assign_roles, select_pair, Pair, Role, RoleAssignment};
pub use simulation::{IterationOutcome, Simulation, SimulationReport, StopHandle};
pub use topology::{GridDims, Topology, TopologyKind};
pub use update::{ChangeKind, Decision, DecisionOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
