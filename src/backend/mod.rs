//! LLM collaborator backends.
//!
//! The collaborator is the only source of judgment in a simulation: it writes
//! each utterance of a debate and answers the defender's final "did you change
//! your mind?" question. Everything else (scheduling, ordering, belief mutation)
//! is deterministic and lives in the core.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │   ConversationDriver / UpdateEngine       │
//! │        (retry + per-request timeout)      │
//! └──────────────────┬───────────────────────┘
//!                    │ dyn Collaborator
//!        ┌───────────┼─────────────┐
//!        ▼           ▼             ▼
//! ┌────────────┐ ┌────────────┐ ┌────────────────┐
//! │   Ollama   │ │  OpenAI /  │ │ ScriptedBackend│
//! │ /api/chat  │ │ OpenRouter │ │ (deterministic)│
//! └────────────┘ └────────────┘ └────────────────┘
//! ```
//!
//! Backends are stateless with respect to the conversation: every request
//! carries both roles, both beliefs and the full transcript so far.

mod http;
pub mod prompts;
mod retry;
mod scripted;

pub use http::ChatBackend;
pub use retry::{call_with_retry, ExponentialBackoff, RetryPolicy};
pub use scripted::{CallKind, DecisionScript, ScriptedBackend, ScriptedCall};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::conversation::{ConversationContext, Utterance};
use crate::error::{Result, SimError};
use crate::schedule::Role;

/// Request for the next utterance of a debate
#[derive(Debug, Clone)]
pub struct UtteranceRequest {
    /// Both participants with roles and beliefs
    pub context: ConversationContext,
    /// Who speaks next
    pub speaker: Role,
    /// 1-based round number
    pub round: u32,
    /// Every utterance so far, in order
    pub transcript: Vec<Utterance>,
}

/// Request for the defender's final decision
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    /// Both participants with roles and beliefs
    pub context: ConversationContext,
    /// The closed transcript
    pub transcript: Vec<Utterance>,
}

/// Pluggable LLM collaborator.
///
/// Implementations return raw text; interpreting the decision reply is the
/// update engine's job so that every backend gets the same fail-safe parsing.
pub trait Collaborator: Send + Sync {
    /// Seed the collaborator with both beliefs and roles before round 1.
    ///
    /// Stateless backends have nothing to do here.
    fn open<'a>(&'a self, _context: &'a ConversationContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(futures::future::ready(Ok(())))
    }

    /// Produce the next utterance for `request.speaker`.
    fn generate_utterance<'a>(&'a self, request: &'a UtteranceRequest)
        -> BoxFuture<'a, Result<String>>;

    /// Ask the defender whether, and to what, it revises its belief.
    fn decide<'a>(&'a self, request: &'a DecisionRequest) -> BoxFuture<'a, Result<String>>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Collaborator backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Local Ollama server (`/api/chat`)
    #[default]
    Ollama,
    /// OpenAI-compatible chat completions (OpenAI, OpenRouter, llama.cpp server)
    OpenAi,
    /// Deterministic offline stub
    Scripted,
}

impl Provider {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Scripted => "scripted",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Provider {
    type Err = SimError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" | "openrouter" => Ok(Self::OpenAi),
            "scripted" | "dry-run" | "stub" => Ok(Self::Scripted),
            _ => Err(SimError::Configuration(format!(
                "Unknown provider: {s}. Use: ollama, openai, scripted"
            ))),
        }
    }
}

/// Build the collaborator described by `config`.
pub fn from_config(config: &BackendConfig) -> Result<Arc<dyn Collaborator>> {
    let backend: Arc<dyn Collaborator> = match config.provider {
        Provider::Scripted => Arc::new(ScriptedBackend::new(DecisionScript::Alternate)),
        Provider::Ollama | Provider::OpenAi => Arc::new(ChatBackend::from_config(config)?),
    };
    tracing::info!("Collaborator backend: {} ({})", backend.name(), config.model);
    Ok(backend)
}
