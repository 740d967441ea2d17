//! Persistent log sinks.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{LogRecord, RunInfo, SimEvent};
use crate::error::{Result, SimError};
use crate::present::belief_index_grid;
use crate::schedule::Role;

/// Destination for log records
pub trait LogSink: Send {
    /// Persist one record
    fn write(&mut self, record: &LogRecord) -> Result<()>;

    /// Flush buffered output
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One JSON object per line; the format [`Replay`](super::Replay) reads
pub struct JsonlSink<W: Write + Send> {
    writer: BufWriter<W>,
}

impl JsonlSink<File> {
    /// Create (or truncate) a JSONL file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write + Send> JsonlSink<W> {
    /// Wrap any writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Flush and return the inner writer
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| SimError::Io(e.into_error()))
    }
}

impl<W: Write + Send> LogSink for JsonlSink<W> {
    fn write(&mut self, record: &LogRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        // Keep the file replayable if the process dies mid-run.
        if matches!(
            record.event,
            SimEvent::IterationCompleted { .. }
                | SimEvent::IterationFailed { .. }
                | SimEvent::RunStopped { .. }
                | SimEvent::RunFinished { .. }
        ) {
            self.writer.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

const HEAVY_RULE: usize = 80;
const LIGHT_RULE: usize = 40;

/// Sectioned, human-readable run log
pub struct TextLogSink<W: Write + Send> {
    writer: BufWriter<W>,
    info: Option<RunInfo>,
    positions: Vec<String>,
    pool: Vec<String>,
}

impl TextLogSink<File> {
    /// Create (or truncate) a text log file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write + Send> TextLogSink<W> {
    /// Wrap any writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            info: None,
            positions: Vec::new(),
            pool: Vec::new(),
        }
    }

    fn heavy(&mut self) -> Result<()> {
        writeln!(self.writer, "{}", "=".repeat(HEAVY_RULE))?;
        Ok(())
    }

    fn light(&mut self) -> Result<()> {
        writeln!(self.writer, "{}", "-".repeat(LIGHT_RULE))?;
        Ok(())
    }

    fn section(&mut self, title: &str) -> Result<()> {
        writeln!(self.writer, "{title}")?;
        self.light()
    }

    fn position(&self, index: usize) -> &str {
        self.positions.get(index).map_or("?", String::as_str)
    }

    fn agent_beliefs(&mut self, beliefs: &[String]) -> Result<()> {
        for (i, belief) in beliefs.iter().enumerate() {
            let label = self.position(i).to_string();
            writeln!(self.writer, "Agent {i} @ {label}:")?;
            writeln!(self.writer, "  {belief}\n")?;
        }
        Ok(())
    }

    fn belief_grid(&mut self, beliefs: &[String]) -> Result<()> {
        let columns = self
            .info
            .as_ref()
            .map_or(beliefs.len(), |i| i.dims.map_or(i.agents, |d| d.cols));
        writeln!(self.writer, "Current beliefs (pool indices, * = revised):")?;
        writeln!(self.writer, "{}", belief_index_grid(beliefs, &self.pool, columns))?;
        Ok(())
    }

    fn network_word(&self) -> &'static str {
        match &self.info {
            Some(info) if info.topology.is_grid() => "GRID",
            _ => "NETWORK",
        }
    }

    fn run_started(&mut self, record: &LogRecord) -> Result<()> {
        let SimEvent::RunStarted {
            run_id,
            info,
            belief_pool,
            initial_beliefs,
            positions,
            prompts,
        } = &record.event
        else {
            return Ok(());
        };
        self.info = Some(info.clone());
        self.positions = positions.clone();
        self.pool = belief_pool.clone();

        self.heavy()?;
        writeln!(self.writer, "AGENTIC BELIEF PROPAGATION SIMULATION LOG")?;
        writeln!(self.writer, "Run: {run_id}")?;
        writeln!(self.writer, "Started: {}", record.at.to_rfc3339())?;
        self.heavy()?;
        writeln!(self.writer)?;

        self.section("CONFIGURATION")?;
        match info.dims {
            Some(dims) => writeln!(
                self.writer,
                "Topology: {} {}x{} ({} agents)",
                info.topology, dims.rows, dims.cols, info.agents
            )?,
            None => writeln!(self.writer, "Topology: {} ({} agents)", info.topology, info.agents)?,
        }
        writeln!(self.writer, "Conversation rounds: {}", info.rounds)?;
        writeln!(self.writer, "Simulation iterations: {}", info.iterations)?;
        writeln!(self.writer, "Model: {} via {}", info.model, info.provider)?;
        if info.seeded {
            writeln!(self.writer, "Random seed: {}", info.seed)?;
        } else {
            writeln!(self.writer, "Random seed: {} (drawn, not configured)", info.seed)?;
        }
        writeln!(self.writer)?;

        self.section("SYSTEM PROMPTS")?;
        writeln!(self.writer, "PERSUADER PROMPT:\n{}\n", prompts.persuader)?;
        writeln!(self.writer, "DEFENDER PROMPT:\n{}\n", prompts.defender)?;
        writeln!(self.writer, "DECISION PROMPT:\n{}\n", prompts.decision)?;
        self.light()?;
        writeln!(self.writer)?;

        self.section("AVAILABLE BELIEFS")?;
        for (i, belief) in belief_pool.iter().enumerate() {
            writeln!(self.writer, "[{i}] {belief}")?;
        }
        writeln!(self.writer)?;

        let word = self.network_word();
        self.section(&format!("STARTING {word} BELIEFS"))?;
        self.agent_beliefs(initial_beliefs)?;
        self.belief_grid(initial_beliefs)?;
        Ok(())
    }
}

impl<W: Write + Send> LogSink for TextLogSink<W> {
    fn write(&mut self, record: &LogRecord) -> Result<()> {
        match &record.event {
            SimEvent::RunStarted { .. } => self.run_started(record)?,
            SimEvent::IterationStarted { iteration } => {
                let total = self.info.as_ref().map_or(0, |i| i.iterations);
                self.heavy()?;
                writeln!(self.writer, "ITERATION {iteration}/{total}")?;
                writeln!(self.writer, "Time: {}", record.at.to_rfc3339())?;
                self.heavy()?;
                writeln!(self.writer)?;
            },
            SimEvent::PairSelected { .. } => {},
            SimEvent::RolesAssigned { context, .. } => {
                for role in [Role::Persuader, Role::Defender] {
                    let who = context.participant(role);
                    writeln!(
                        self.writer,
                        "{}: Agent {} @ {}",
                        role.as_str().to_uppercase(),
                        who.id.0,
                        who.position
                    )?;
                    writeln!(self.writer, "Belief: {}\n", who.belief)?;
                }
                self.light()?;
                writeln!(self.writer, "CONVERSATION")?;
                self.light()?;
                writeln!(self.writer)?;
            },
            SimEvent::Utterance { utterance, .. } => {
                writeln!(
                    self.writer,
                    "[Round {}] {}:",
                    utterance.round,
                    utterance.speaker.as_str().to_uppercase()
                )?;
                writeln!(self.writer, "{}\n", utterance.text)?;
            },
            SimEvent::DecisionMade {
                old_belief,
                outcome,
                ..
            } => {
                self.light()?;
                self.section("DECISION")?;
                writeln!(self.writer, "Old belief: {old_belief}\n")?;
                writeln!(self.writer, "New belief: {}\n", outcome.decision.belief)?;
                writeln!(
                    self.writer,
                    "Change type: {}\n",
                    outcome.change.as_str().to_uppercase()
                )?;
                if let Some(e) = &outcome.parse_error {
                    writeln!(self.writer, "Unreadable reply ({e}): {}\n", outcome.raw_reply)?;
                }
            },
            SimEvent::IterationFailed { error, beliefs, .. } => {
                self.light()?;
                self.section("FAILED")?;
                writeln!(self.writer, "{error}\nBeliefs unchanged.\n")?;
                self.belief_grid(beliefs)?;
            },
            SimEvent::IterationCompleted { beliefs, .. } => self.belief_grid(beliefs)?,
            SimEvent::RunStopped { after_iterations } => {
                self.heavy()?;
                writeln!(self.writer, "STOPPED after {after_iterations} iterations")?;
                writeln!(self.writer)?;
            },
            SimEvent::RunFinished {
                summary,
                final_beliefs,
            } => {
                let word = self.network_word();
                self.heavy()?;
                writeln!(self.writer, "FINAL {word} BELIEFS")?;
                self.heavy()?;
                writeln!(self.writer)?;
                self.agent_beliefs(final_beliefs)?;

                self.heavy()?;
                writeln!(self.writer, "SIMULATION SUMMARY")?;
                self.heavy()?;
                writeln!(self.writer, "Completed: {}", record.at.to_rfc3339())?;
                writeln!(self.writer, "Total iterations: {}", summary.attempted())?;
                writeln!(self.writer, "Failed iterations: {}", summary.failed)?;
                writeln!(self.writer, "Belief changes detected: {}", summary.belief_changes)?;
                writeln!(self.writer, "Belief refinements: {}", summary.refinements)?;
                writeln!(self.writer, "Unreadable decisions: {}", summary.parse_errors)?;
                writeln!(self.writer, "Change rate: {:.1}%", summary.change_rate())?;
                self.writer.flush()?;
            },
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
