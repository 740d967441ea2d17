//! Reconstruct interactions and registry state from a persisted log.
//!
//! Replay never touches the random generator: initial beliefs come from
//! `RunStarted`, every later change from `DecisionMade`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use super::{LogRecord, RunInfo, RunSummary, SimEvent};
use crate::conversation::{ConversationContext, Utterance};
use crate::error::{Result, SimError};
use crate::schedule::RoleAssignment;
use crate::update::DecisionOutcome;

/// One interaction as recorded
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayedInteraction {
    /// 1-based iteration
    pub iteration: u32,
    /// Roles
    pub roles: RoleAssignment,
    /// Participants as of the start of the debate
    pub context: ConversationContext,
    /// Utterances in order, with original timing
    pub utterances: Vec<Utterance>,
    /// Decision, absent if the iteration failed
    pub outcome: Option<DecisionOutcome>,
    /// Failure description for skipped iterations
    pub failure: Option<String>,
}

impl ReplayedInteraction {
    /// Wait before each utterance to reproduce the original pacing
    pub fn pacing(&self) -> Vec<Duration> {
        let mut last = 0;
        self.utterances
            .iter()
            .map(|u| {
                let gap = u.elapsed_ms.saturating_sub(last);
                last = u.elapsed_ms;
                Duration::from_millis(gap)
            })
            .collect()
    }
}

/// A loaded log
#[derive(Debug, Clone)]
pub struct Replay {
    records: Vec<LogRecord>,
}

impl Replay {
    /// Load a JSON Lines log.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let records = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str::<LogRecord>(line).map_err(|e| {
                    SimError::Replay(format!("{}:{}: {}", path.display(), n + 1, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_records(records))
    }

    /// Wrap records already in memory.
    pub fn from_records(records: Vec<LogRecord>) -> Self {
        Self { records }
    }

    /// All records
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    fn run_started(&self) -> Result<(&RunInfo, &[String])> {
        self.records
            .iter()
            .find_map(|r| match &r.event {
                SimEvent::RunStarted {
                    info,
                    initial_beliefs,
                    ..
                } => Some((info, initial_beliefs.as_slice())),
                _ => None,
            })
            .ok_or_else(|| SimError::Replay("log has no run_started record".to_string()))
    }

    /// Run parameters
    pub fn info(&self) -> Result<&RunInfo> {
        self.run_started().map(|(info, _)| info)
    }

    /// Summary, if the run finished
    pub fn summary(&self) -> Option<&RunSummary> {
        self.records.iter().rev().find_map(|r| match &r.event {
            SimEvent::RunFinished { summary, .. } => Some(summary),
            _ => None,
        })
    }

    /// Number of iterations that started
    pub fn iteration_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.event, SimEvent::IterationStarted { .. }))
            .count()
    }

    /// Reassemble iteration `index` (1-based).
    pub fn interaction(&self, index: u32) -> Result<ReplayedInteraction> {
        let mut roles = None;
        let mut utterances = Vec::new();
        let mut outcome = None;
        let mut failure = None;
        let mut found = false;

        for record in self.records.iter().filter(|r| r.event.iteration() == Some(index)) {
            found = true;
            match &record.event {
                SimEvent::RolesAssigned {
                    roles: assigned,
                    context,
                    ..
                } => roles = Some((*assigned, context.clone())),
                SimEvent::Utterance { utterance, .. } => utterances.push(utterance.clone()),
                SimEvent::DecisionMade { outcome: o, .. } => outcome = Some(o.clone()),
                SimEvent::IterationFailed { error, .. } => failure = Some(error.clone()),
                _ => {},
            }
        }

        if !found {
            return Err(SimError::Replay(format!(
                "iteration {index} not in log ({} recorded)",
                self.iteration_count()
            )));
        }
        let (roles, context) = roles.ok_or_else(|| {
            SimError::Replay(format!("iteration {index} has no role assignment"))
        })?;

        Ok(ReplayedInteraction {
            iteration: index,
            roles,
            context,
            utterances,
            outcome,
            failure,
        })
    }

    /// Registry contents after the last recorded decision.
    pub fn final_beliefs(&self) -> Result<Vec<String>> {
        let (_, initial) = self.run_started()?;
        let mut beliefs = initial.to_vec();

        for record in &self.records {
            if let SimEvent::DecisionMade {
                defender, outcome, ..
            } = &record.event
            {
                if !outcome.decision.updated {
                    continue;
                }
                let slot = beliefs.get_mut(defender.0).ok_or_else(|| {
                    SimError::Replay(format!("decision for unknown {defender} at #{}", record.seq))
                })?;
                slot.clone_from(&outcome.decision.belief);
            }
        }
        Ok(beliefs)
    }
}
