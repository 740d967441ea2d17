//! Append-only, totally ordered event log.
//!
//! Every state change of a run is recorded as a [`LogRecord`] with a
//! monotonically increasing sequence number. Records are:
//!
//! - kept in memory for the final [`SimulationReport`](crate::SimulationReport),
//! - written to every attached [`LogSink`] (JSON Lines, human-readable text),
//! - broadcast to observers over a `tokio::sync::broadcast` channel.
//!
//! Observers are read-only; the log behaves identically with no subscriber.
//!
//! An iteration is a contiguous block starting with
//! [`SimEvent::IterationStarted`] and ending with
//! [`SimEvent::IterationCompleted`] or [`SimEvent::IterationFailed`].

mod replay;
mod sink;

pub use replay::{Replay, ReplayedInteraction};
pub use sink::{JsonlSink, LogSink, TextLogSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::backend::prompts::{system_prompt, DECISION_INSTRUCTION};
use crate::backend::Provider;
use crate::conversation::{ConversationContext, Utterance};
use crate::error::Result;
use crate::registry::AgentId;
use crate::schedule::{Pair, Role, RoleAssignment};
use crate::topology::{GridDims, TopologyKind};
use crate::update::DecisionOutcome;

/// Default broadcast buffer per subscriber
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Run parameters recorded at start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    /// Topology variant
    pub topology: TopologyKind,
    /// Number of agents
    pub agents: usize,
    /// Lattice dimensions for grids
    pub dims: Option<GridDims>,
    /// Rounds per conversation
    pub rounds: u32,
    /// Planned iterations
    pub iterations: u32,
    /// Model identifier
    pub model: String,
    /// Collaborator provider
    pub provider: Provider,
    /// Seed actually used
    pub seed: u64,
    /// False when the seed was drawn from entropy
    pub seeded: bool,
}

/// Prompt templates in effect for the run; `{belief}` marks the substitution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSet {
    /// Persuader system prompt
    pub persuader: String,
    /// Defender system prompt
    pub defender: String,
    /// Final decision question
    pub decision: String,
}

impl PromptSet {
    /// The prompts sent by the built-in backends
    pub fn standard() -> Self {
        Self {
            persuader: system_prompt("{belief}", Role::Persuader),
            defender: system_prompt("{belief}", Role::Defender),
            decision: DECISION_INSTRUCTION.to_string(),
        }
    }
}

/// Aggregate counters for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Planned iterations
    pub iterations_planned: u32,
    /// Iterations that reached a decision
    pub completed: u32,
    /// Iterations skipped after a conversation failure
    pub failed: u32,
    /// Decisions that replaced a belief with a different one
    pub belief_changes: u32,
    /// Decisions that rephrased a belief without changing its opening
    #[serde(default)]
    pub refinements: u32,
    /// Decisions defaulted to "no change" because the reply was unreadable
    pub parse_errors: u32,
    /// Whether the run was stopped early
    pub stopped: bool,
}

impl RunSummary {
    /// Share of completed iterations that changed a belief, in percent.
    ///
    /// Refinements are not counted as changes.
    pub fn change_rate(&self) -> f64 {
        if self.completed == 0 {
            return 0.0;
        }
        f64::from(self.belief_changes) / f64::from(self.completed) * 100.0
    }

    /// Iterations attempted so far
    pub fn attempted(&self) -> u32 {
        self.completed + self.failed
    }
}

/// Everything that can happen during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    /// Run configured; initial state recorded
    RunStarted {
        /// Unique run identifier
        run_id: Uuid,
        /// Run parameters
        info: RunInfo,
        /// Beliefs agents were drawn from
        belief_pool: Vec<String>,
        /// Starting belief per agent id
        initial_beliefs: Vec<String>,
        /// Position label per agent id
        positions: Vec<String>,
        /// Prompt templates
        prompts: PromptSet,
    },
    /// Iteration begins (1-based)
    IterationStarted {
        /// Iteration number
        iteration: u32,
    },
    /// Pair drawn
    PairSelected {
        /// Iteration number
        iteration: u32,
        /// Drawn pair
        pair: Pair,
    },
    /// Roles assigned; beliefs captured as of the start of the debate
    RolesAssigned {
        /// Iteration number
        iteration: u32,
        /// Who persuades, who defends
        roles: RoleAssignment,
        /// Participants with beliefs and positions
        context: ConversationContext,
    },
    /// One debate turn
    Utterance {
        /// Iteration number
        iteration: u32,
        /// The turn
        utterance: Utterance,
    },
    /// Defender decided
    DecisionMade {
        /// Iteration number
        iteration: u32,
        /// Agent that may change
        defender: AgentId,
        /// Belief before the decision
        old_belief: String,
        /// Interpreted reply
        outcome: DecisionOutcome,
    },
    /// Iteration skipped; registry untouched
    IterationFailed {
        /// Iteration number
        iteration: u32,
        /// Failure description
        error: String,
        /// Belief per agent id at the end of the iteration
        beliefs: Vec<String>,
    },
    /// Decision applied
    IterationCompleted {
        /// Iteration number
        iteration: u32,
        /// Whether the registry changed
        changed: bool,
        /// Belief per agent id at the end of the iteration
        beliefs: Vec<String>,
    },
    /// Stop requested; no further iterations
    RunStopped {
        /// Iterations attempted before stopping
        after_iterations: u32,
    },
    /// Run over
    RunFinished {
        /// Counters
        summary: RunSummary,
        /// Belief per agent id
        final_beliefs: Vec<String>,
    },
}

impl SimEvent {
    /// Belief snapshot carried by iteration-closing events
    pub fn beliefs(&self) -> Option<&[String]> {
        match self {
            SimEvent::IterationFailed { beliefs, .. }
            | SimEvent::IterationCompleted { beliefs, .. } => Some(beliefs),
            SimEvent::RunStarted {
                initial_beliefs, ..
            } => Some(initial_beliefs),
            SimEvent::RunFinished { final_beliefs, .. } => Some(final_beliefs),
            _ => None,
        }
    }

    /// Event type name as serialized
    pub fn kind(&self) -> &'static str {
        match self {
            SimEvent::RunStarted { .. } => "run_started",
            SimEvent::IterationStarted { .. } => "iteration_started",
            SimEvent::PairSelected { .. } => "pair_selected",
            SimEvent::RolesAssigned { .. } => "roles_assigned",
            SimEvent::Utterance { .. } => "utterance",
            SimEvent::DecisionMade { .. } => "decision_made",
            SimEvent::IterationFailed { .. } => "iteration_failed",
            SimEvent::IterationCompleted { .. } => "iteration_completed",
            SimEvent::RunStopped { .. } => "run_stopped",
            SimEvent::RunFinished { .. } => "run_finished",
        }
    }

    /// Iteration the event belongs to, if any
    pub fn iteration(&self) -> Option<u32> {
        match self {
            SimEvent::IterationStarted { iteration }
            | SimEvent::PairSelected { iteration, .. }
            | SimEvent::RolesAssigned { iteration, .. }
            | SimEvent::Utterance { iteration, .. }
            | SimEvent::DecisionMade { iteration, .. }
            | SimEvent::IterationFailed { iteration, .. }
            | SimEvent::IterationCompleted { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }
}

/// A sequenced, timestamped event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Position in the log, starting at 0
    pub seq: u64,
    /// Wall-clock time of the append
    pub at: DateTime<Utc>,
    /// The event
    pub event: SimEvent,
}

/// In-memory log with sinks and a broadcast feed
pub struct EventLog {
    records: Vec<LogRecord>,
    sender: broadcast::Sender<LogRecord>,
    sinks: Vec<Box<dyn LogSink>>,
}

impl EventLog {
    /// Create a log whose subscribers buffer up to `capacity` records.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            records: Vec::new(),
            sender,
            sinks: Vec::new(),
        }
    }

    /// Attach a persistent sink. It only sees records appended afterwards.
    pub fn add_sink(&mut self, sink: Box<dyn LogSink>) {
        self.sinks.push(sink);
    }

    /// Subscribe to records appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.sender.subscribe()
    }

    /// Append an event. Sink write failures are returned.
    pub fn append(&mut self, event: SimEvent) -> Result<()> {
        let record = LogRecord {
            seq: self.records.len() as u64,
            at: Utc::now(),
            event,
        };
        tracing::trace!("log #{} {}", record.seq, record.event.kind());

        for sink in &mut self.sinks {
            sink.write(&record)?;
        }
        // No receivers is fine.
        let _ = self.sender.send(record.clone());
        self.records.push(record);
        Ok(())
    }

    /// Flush every sink.
    pub fn flush(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }

    /// Records so far
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if nothing has been appended
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take the records, dropping sinks and the broadcast sender
    pub fn into_records(self) -> Vec<LogRecord> {
        self.records
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("records", &self.records.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
