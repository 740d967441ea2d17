//! Deterministic offline collaborator.
//!
//! Used by `--dry-run` and by the test suites. Replies depend only on the
//! request, so two runs with the same seed produce identical logs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use super::prompts::UNCHANGED_TOKEN;
use super::{Collaborator, DecisionRequest, UtteranceRequest};
use crate::conversation::ConversationContext;
use crate::error::{Result, SimError};
use crate::schedule::Role;

/// How the scripted defender answers the final question
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionScript {
    /// Always reply `UNCHANGED`
    Keep,
    /// Always adopt the persuader's belief
    Adopt,
    /// Adopt when the pair's id sum is odd, keep otherwise
    Alternate,
    /// Reply with text that cannot be interpreted
    Garbled,
    /// Reply with this exact text
    Fixed(String),
}

/// Kind of call a scripted backend received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `open`
    Open,
    /// `generate_utterance`
    Utterance,
    /// `decide`
    Decision,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCall {
    /// What was asked
    pub kind: CallKind,
    /// Speaker for utterances, defender for decisions, persuader for openings
    pub role: Role,
    /// Round number (0 for open/decide)
    pub round: u32,
    /// Transcript length carried by the request
    pub transcript_len: usize,
}

/// Scripted collaborator
pub struct ScriptedBackend {
    script: DecisionScript,
    failures_remaining: AtomicU32,
    latency: Option<Duration>,
    calls: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedBackend {
    /// Create a backend answering decisions with `script`.
    pub fn new(script: DecisionScript) -> Self {
        Self {
            script,
            failures_remaining: AtomicU32::new(0),
            latency: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail the first `count` utterance/decision calls with a backend error.
    pub fn with_failures(self, count: u32) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Sleep before every reply.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: ScriptedCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn reply(&self, text: String) -> Result<String> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.take_failure() {
            return Err(SimError::Backend("scripted failure".to_string()));
        }
        Ok(text)
    }

    fn utterance_text(request: &UtteranceRequest) -> String {
        let belief = request.context.belief_of(request.speaker);
        match request.speaker {
            Role::Persuader => format!("Round {}: consider that {}", request.round, belief),
            Role::Defender => format!("Round {}: I still hold that {}", request.round, belief),
        }
    }

    fn decision_text(&self, context: &ConversationContext) -> String {
        let adopt = || {
            let belief = context.persuader.belief.trim();
            if belief.starts_with("I ") || belief.starts_with("I'") {
                belief.to_string()
            } else {
                format!("I believe that {belief}")
            }
        };
        match &self.script {
            DecisionScript::Keep => UNCHANGED_TOKEN.to_string(),
            DecisionScript::Adopt => adopt(),
            DecisionScript::Alternate => {
                if (context.persuader.id.0 + context.defender.id.0) % 2 == 1 {
                    adopt()
                } else {
                    UNCHANGED_TOKEN.to_string()
                }
            },
            DecisionScript::Garbled => "~~ static ~~".to_string(),
            DecisionScript::Fixed(text) => text.clone(),
        }
    }
}

impl Collaborator for ScriptedBackend {
    fn open<'a>(&'a self, context: &'a ConversationContext) -> BoxFuture<'a, Result<()>> {
        self.record(ScriptedCall {
            kind: CallKind::Open,
            role: Role::Persuader,
            round: 0,
            transcript_len: 0,
        });
        tracing::trace!(
            "scripted open: {} vs {}",
            context.persuader.id,
            context.defender.id
        );
        Box::pin(futures::future::ready(Ok(())))
    }

    fn generate_utterance<'a>(
        &'a self,
        request: &'a UtteranceRequest,
    ) -> BoxFuture<'a, Result<String>> {
        self.record(ScriptedCall {
            kind: CallKind::Utterance,
            role: request.speaker,
            round: request.round,
            transcript_len: request.transcript.len(),
        });
        Box::pin(self.reply(Self::utterance_text(request)))
    }

    fn decide<'a>(&'a self, request: &'a DecisionRequest) -> BoxFuture<'a, Result<String>> {
        self.record(ScriptedCall {
            kind: CallKind::Decision,
            role: Role::Defender,
            round: 0,
            transcript_len: request.transcript.len(),
        });
        Box::pin(self.reply(self.decision_text(&request.context)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
