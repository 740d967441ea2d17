//! Bounded multi-round debate between a persuader and a defender.
//!
//! A [`Conversation`] is the state machine (`Opening → Exchanging → Closed`);
//! the [`ConversationDriver`] walks it against a [`Collaborator`], one request
//! per turn, with retry and a per-request timeout.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::backend::{call_with_retry, Collaborator, ExponentialBackoff, UtteranceRequest};
use crate::error::{Result, SimError};
use crate::registry::AgentId;
use crate::schedule::Role;

/// One turn of a debate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    /// Who spoke
    pub speaker: Role,
    /// 1-based round
    pub round: u32,
    /// What was said
    pub text: String,
    /// Milliseconds since the interaction started
    pub elapsed_ms: u64,
}

/// An agent taking part in an interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Agent id
    pub id: AgentId,
    /// Belief at the start of the interaction
    pub belief: String,
    /// Human-readable position label
    pub position: String,
}

/// Roles and beliefs for one interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Speaks first every round
    pub persuader: Participant,
    /// May revise its belief afterwards
    pub defender: Participant,
}

impl ConversationContext {
    /// Participant holding `role`
    pub fn participant(&self, role: Role) -> &Participant {
        match role {
            Role::Persuader => &self.persuader,
            Role::Defender => &self.defender,
        }
    }

    /// Belief of the participant holding `role`
    pub fn belief_of(&self, role: Role) -> &str {
        &self.participant(role).belief
    }
}

/// Conversation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Context seeded, nothing said yet
    Opening,
    /// Turns are being exchanged in `round`
    Exchanging {
        /// Current 1-based round
        round: u32,
    },
    /// All rounds done; the transcript is final
    Closed,
}

/// Ordered, finalized record of a debate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    utterances: Vec<Utterance>,
}

impl Transcript {
    /// Utterances in (round, turn) order
    pub fn utterances(&self) -> &[Utterance] {
        &self.utterances
    }

    /// Number of utterances
    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    /// True if nothing was said
    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }
}

/// A single debate in progress
#[derive(Debug)]
pub struct Conversation {
    rounds: u32,
    state: ConversationState,
    utterances: Vec<Utterance>,
    started: Instant,
}

impl Conversation {
    /// Start a conversation of `rounds` rounds.
    pub fn new(rounds: u32) -> Result<Self> {
        if rounds == 0 {
            return Err(SimError::Configuration(
                "a conversation needs at least one round".to_string(),
            ));
        }
        Ok(Self {
            rounds,
            state: ConversationState::Opening,
            utterances: Vec::with_capacity(2 * rounds as usize),
            started: Instant::now(),
        })
    }

    /// Current state
    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Utterances recorded so far
    pub fn utterances(&self) -> &[Utterance] {
        &self.utterances
    }

    /// Leave `Opening` and start round 1.
    pub fn begin_exchange(&mut self) -> Result<()> {
        if self.state != ConversationState::Opening {
            return Err(SimError::ProtocolViolation(format!(
                "Cannot begin exchange in state {:?}",
                self.state
            )));
        }
        self.state = ConversationState::Exchanging { round: 1 };
        Ok(())
    }

    /// Who speaks next and in which round; `None` unless exchanging.
    pub fn next_speaker(&self) -> Option<(Role, u32)> {
        match self.state {
            ConversationState::Exchanging { round } => {
                let role = if self.utterances.len() % 2 == 0 {
                    Role::Persuader
                } else {
                    Role::Defender
                };
                Some((role, round))
            },
            _ => None,
        }
    }

    /// Append the next speaker's text.
    ///
    /// The defender's turn ends the round; the last round closes the
    /// conversation.
    pub fn record(&mut self, text: String) -> Result<Utterance> {
        let (speaker, round) = self.next_speaker().ok_or_else(|| {
            SimError::ProtocolViolation(format!(
                "Cannot record utterance in state {:?}",
                self.state
            ))
        })?;

        let utterance = Utterance {
            speaker,
            round,
            text,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };
        self.utterances.push(utterance.clone());

        if speaker == Role::Defender {
            self.state = if round >= self.rounds {
                ConversationState::Closed
            } else {
                ConversationState::Exchanging { round: round + 1 }
            };
        }
        Ok(utterance)
    }

    /// Finalize a closed conversation.
    pub fn finish(self) -> Result<Transcript> {
        if self.state != ConversationState::Closed {
            return Err(SimError::ProtocolViolation(format!(
                "Cannot finish conversation in state {:?}",
                self.state
            )));
        }
        Ok(Transcript {
            utterances: self.utterances,
        })
    }
}

/// Drives a conversation against a collaborator
#[derive(Debug, Clone)]
pub struct ConversationDriver {
    /// Rounds per conversation
    pub rounds: u32,
    /// Bound on each collaborator request
    pub request_timeout: Duration,
    /// Retry policy for failed requests
    pub retry: ExponentialBackoff,
}

impl ConversationDriver {
    /// Run a full debate. `on_utterance` sees each utterance as soon as it is
    /// recorded; an error from it aborts the conversation.
    pub async fn run(
        &self,
        collaborator: &dyn Collaborator,
        context: &ConversationContext,
        on_utterance: &mut (dyn FnMut(&Utterance) -> Result<()> + Send),
    ) -> Result<Transcript> {
        let mut conversation = Conversation::new(self.rounds)?;

        call_with_retry(&self.retry, self.request_timeout, "open", || {
            collaborator.open(context)
        })
        .await?;
        conversation.begin_exchange()?;

        while let Some((speaker, round)) = conversation.next_speaker() {
            let request = UtteranceRequest {
                context: context.clone(),
                speaker,
                round,
                transcript: conversation.utterances().to_vec(),
            };
            let request = &request;
            let text = call_with_retry(&self.retry, self.request_timeout, speaker.as_str(), || {
                collaborator.generate_utterance(request)
            })
            .await?;

            tracing::debug!("round {} {}: {} chars", round, speaker, text.len());
            let utterance = conversation.record(text)?;
            on_utterance(&utterance)?;
        }

        conversation.finish()
    }
}
