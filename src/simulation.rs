//! The simulation loop.
//!
//! A [`Simulation`] owns every piece of mutable state for a run: the seeded
//! generator, the agent registry and the event log. Iterations run strictly
//! one after another; the only suspension points are collaborator calls.
//!
//! ```text
//! IterationStarted → PairSelected → RolesAssigned → Utterance × 2R
//!     → DecisionMade → IterationCompleted
//!                 └─(conversation failure)─→ IterationFailed
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::backend::{Collaborator, ExponentialBackoff};
use crate::config::SimulationConfig;
use crate::conversation::{ConversationContext, ConversationDriver, Participant, Utterance};
use crate::error::{Result, SimError};
use crate::events::{
    EventLog, LogRecord, LogSink, PromptSet, RunInfo, RunSummary, SimEvent,
    DEFAULT_CHANNEL_CAPACITY,
};
use crate::registry::{AgentId, AgentRegistry};
use crate::schedule::{assign_roles, select_pair, RoleAssignment};
use crate::topology::Topology;
use crate::update::{self, ChangeKind, UpdateEngine};

/// Cooperative stop flag, checked between iterations
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Ask the loop to stop after the current iteration
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Decision reached and applied
    Completed {
        /// Iteration number
        iteration: u32,
        /// Whether the defender's belief changed
        changed: bool,
    },
    /// Conversation failed; nothing changed
    Failed {
        /// Iteration number
        iteration: u32,
        /// Failure description
        error: String,
    },
}

/// Everything a finished run hands to its consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Run identifier
    pub run_id: Uuid,
    /// Seed used
    pub seed: u64,
    /// Counters
    pub summary: RunSummary,
    /// Belief per agent id
    pub final_beliefs: Vec<String>,
    /// The full log
    pub records: Vec<LogRecord>,
}

/// A configured run
pub struct Simulation {
    config: SimulationConfig,
    run_id: Uuid,
    seed: u64,
    belief_pool: Vec<String>,
    rng: StdRng,
    topology: Topology,
    registry: AgentRegistry,
    collaborator: Arc<dyn Collaborator>,
    driver: ConversationDriver,
    engine: UpdateEngine,
    log: EventLog,
    summary: RunSummary,
    iteration: u32,
    started: bool,
    stop: StopHandle,
}

impl Simulation {
    /// Validate `config`, build the network and draw initial beliefs.
    pub fn new(config: SimulationConfig, collaborator: Arc<dyn Collaborator>) -> Result<Self> {
        config.validate()?;

        let belief_pool = config.beliefs.resolve()?;
        let seed = config
            .simulation
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen());
        let mut rng = StdRng::seed_from_u64(seed);

        let topology = Topology::build(
            config.topology.kind,
            config.topology.agents,
            config.topology.dims()?,
        )?;
        let registry = AgentRegistry::sample(&belief_pool, topology.agent_count(), &mut rng)?;

        let request_timeout = Duration::from_secs(config.backend.timeout_secs);
        let retry = ExponentialBackoff::from(&config.retry);

        tracing::info!(
            "Simulation ready: {} with {} agents ({} edges), seed {}",
            topology.kind(),
            topology.agent_count(),
            topology.edge_count(),
            seed
        );

        Ok(Self {
            driver: ConversationDriver {
                rounds: config.simulation.rounds,
                request_timeout,
                retry: retry.clone(),
            },
            engine: UpdateEngine {
                request_timeout,
                retry,
            },
            summary: RunSummary {
                iterations_planned: config.simulation.iterations,
                ..Default::default()
            },
            run_id: Uuid::new_v4(),
            seed,
            belief_pool,
            rng,
            topology,
            registry,
            collaborator,
            log: EventLog::new(DEFAULT_CHANNEL_CAPACITY),
            iteration: 0,
            started: false,
            stop: StopHandle::default(),
            config,
        })
    }

    /// Attach a persistent log sink (before the run starts to capture everything)
    pub fn add_sink(&mut self, sink: Box<dyn LogSink>) {
        self.log.add_sink(sink);
    }

    /// Subscribe to the record stream
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.log.subscribe()
    }

    /// Handle for requesting a cooperative stop
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run identifier
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Seed in use
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Network
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Current beliefs
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Records so far
    pub fn records(&self) -> &[LogRecord] {
        self.log.records()
    }

    /// Counters so far
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Iterations attempted so far
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Whether every planned iteration has been attempted
    pub fn is_done(&self) -> bool {
        self.iteration >= self.config.simulation.iterations
    }

    fn ensure_started(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        let info = RunInfo {
            topology: self.topology.kind(),
            agents: self.topology.agent_count(),
            dims: self.topology.dims(),
            rounds: self.config.simulation.rounds,
            iterations: self.config.simulation.iterations,
            model: self.config.backend.model.clone(),
            provider: self.config.backend.provider,
            seed: self.seed,
            seeded: self.config.simulation.seed.is_some(),
        };
        let positions = self
            .topology
            .agent_ids()
            .into_iter()
            .map(|id| self.topology.position_label(id))
            .collect();

        self.log.append(SimEvent::RunStarted {
            run_id: self.run_id,
            info,
            belief_pool: self.belief_pool.clone(),
            initial_beliefs: self.registry.snapshot(),
            positions,
            prompts: PromptSet::standard(),
        })
    }

    fn participant(&self, id: AgentId) -> Result<Participant> {
        Ok(Participant {
            id,
            belief: self.registry.belief(id)?.to_string(),
            position: self.topology.position_label(id),
        })
    }

    fn context(&self, roles: &RoleAssignment) -> Result<ConversationContext> {
        Ok(ConversationContext {
            persuader: self.participant(roles.persuader)?,
            defender: self.participant(roles.defender)?,
        })
    }

    /// Run the next iteration.
    ///
    /// Conversation failures are recorded and reported as
    /// [`IterationOutcome::Failed`]; only fatal errors are returned.
    pub async fn step(&mut self) -> Result<IterationOutcome> {
        if self.is_done() {
            return Err(SimError::ProtocolViolation(format!(
                "all {} iterations already ran",
                self.config.simulation.iterations
            )));
        }
        self.ensure_started()?;

        let iteration = self.iteration + 1;
        self.iteration = iteration;
        self.log.append(SimEvent::IterationStarted { iteration })?;

        let pair = select_pair(&self.topology, &mut self.rng)?;
        self.log.append(SimEvent::PairSelected { iteration, pair })?;

        let roles = assign_roles(pair, &mut self.rng);
        let context = self.context(&roles)?;
        self.log.append(SimEvent::RolesAssigned {
            iteration,
            roles,
            context: context.clone(),
        })?;
        tracing::debug!(
            "iteration {}: {} persuades {}",
            iteration,
            roles.persuader,
            roles.defender
        );

        let transcript = {
            let log = &mut self.log;
            let mut on_utterance = |utterance: &Utterance| {
                log.append(SimEvent::Utterance {
                    iteration,
                    utterance: utterance.clone(),
                })
            };
            self.driver
                .run(self.collaborator.as_ref(), &context, &mut on_utterance)
                .await
        };
        let outcome = match transcript {
            Ok(transcript) => {
                self.engine
                    .decide(self.collaborator.as_ref(), &context, &transcript)
                    .await
            },
            Err(e) => Err(e),
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) if !e.is_fatal() => {
                tracing::warn!("iteration {} skipped: {}", iteration, e);
                self.summary.failed += 1;
                let error = e.to_string();
                self.log.append(SimEvent::IterationFailed {
                    iteration,
                    error: error.clone(),
                    beliefs: self.registry.snapshot(),
                })?;
                return Ok(IterationOutcome::Failed { iteration, error });
            },
            Err(e) => return Err(e),
        };

        if outcome.parse_error.is_some() {
            self.summary.parse_errors += 1;
        }
        let decision = outcome.decision.clone();
        let change = outcome.change;
        self.log.append(SimEvent::DecisionMade {
            iteration,
            defender: roles.defender,
            old_belief: context.defender.belief,
            outcome,
        })?;

        let changed = update::apply(&mut self.registry, &roles, decision)?;
        self.summary.completed += 1;
        match (changed, change) {
            (true, ChangeKind::Changed) => self.summary.belief_changes += 1,
            (true, ChangeKind::Similar) => self.summary.refinements += 1,
            _ => {},
        }
        self.log.append(SimEvent::IterationCompleted {
            iteration,
            changed,
            beliefs: self.registry.snapshot(),
        })?;

        tracing::info!(
            "iteration {}/{}: {} {}",
            iteration,
            self.config.simulation.iterations,
            roles.defender,
            if changed { "changed belief" } else { "kept belief" }
        );
        Ok(IterationOutcome::Completed { iteration, changed })
    }

    /// Run all remaining iterations (or until a stop is requested) and
    /// hand over the final state.
    pub async fn run(mut self) -> Result<SimulationReport> {
        self.ensure_started()?;

        while !self.is_done() {
            if self.stop.is_stop_requested() {
                tracing::info!("Stop requested after {} iterations", self.iteration);
                self.summary.stopped = true;
                self.log.append(SimEvent::RunStopped {
                    after_iterations: self.iteration,
                })?;
                break;
            }
            self.step().await?;
        }

        self.finish()
    }

    fn finish(mut self) -> Result<SimulationReport> {
        let final_beliefs = self.registry.snapshot();
        self.log.append(SimEvent::RunFinished {
            summary: self.summary.clone(),
            final_beliefs: final_beliefs.clone(),
        })?;
        self.log.flush()?;

        tracing::info!(
            "Run {} finished: {} changes in {} iterations ({:.1}%)",
            self.run_id,
            self.summary.belief_changes,
            self.summary.attempted(),
            self.summary.change_rate()
        );

        Ok(SimulationReport {
            run_id: self.run_id,
            seed: self.seed,
            summary: self.summary,
            final_beliefs,
            records: self.log.into_records(),
        })
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("run_id", &self.run_id)
            .field("seed", &self.seed)
            .field("topology", &self.topology.kind())
            .field("iteration", &self.iteration)
            .field("collaborator", &self.collaborator.name())
            .finish_non_exhaustive()
    }
}
