//! Prompt construction for debate turns and the final decision.
//!
//! Each speaker sees the conversation from its own side: its own utterances as
//! `assistant` turns, the other agent's as `user` turns.

use serde::{Deserialize, Serialize};

use super::{DecisionRequest, UtteranceRequest};
use crate::conversation::Utterance;
use crate::schedule::Role;

/// Kick-off instruction given to the persuader before its first turn
pub const OPENING_INSTRUCTION: &str =
    "Start the conversation by presenting your belief and why the other person should adopt it.";

/// Final question put to the defender once the debate is closed
pub const DECISION_INSTRUCTION: &str = "Based on this conversation, decide if you want to update \
     your belief or keep it. If you keep it, reply with exactly UNCHANGED. Otherwise output ONLY \
     your new belief as a single statement starting with 'I'. Nothing else. Keep it short and core.";

/// Token a defender uses to signal it keeps its belief
pub const UNCHANGED_TOKEN: &str = "UNCHANGED";

/// A chat message in the common role/content shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`
    pub role: String,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// System prompt for an agent holding `belief` in `role`
pub fn system_prompt(belief: &str, role: Role) -> String {
    match role {
        Role::Persuader => format!(
            "This is your belief: \"{belief}\". You are the persuader. Try to convince the other \
             person of your belief. Be concise."
        ),
        Role::Defender => format!(
            "This is your belief: \"{belief}\". You are the defender. Listen to the other person \
             and critically analyze their arguments based on your belief. Be concise."
        ),
    }
}

fn perspective(me: Role, belief: &str, transcript: &[Utterance]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(transcript.len() + 2);
    messages.push(ChatMessage::system(system_prompt(belief, me)));
    if me == Role::Persuader {
        messages.push(ChatMessage::user(OPENING_INSTRUCTION));
    }
    for utterance in transcript {
        if utterance.speaker == me {
            messages.push(ChatMessage::assistant(utterance.text.clone()));
        } else {
            messages.push(ChatMessage::user(utterance.text.clone()));
        }
    }
    messages
}

/// Messages for the next debate turn
pub fn utterance_messages(request: &UtteranceRequest) -> Vec<ChatMessage> {
    perspective(
        request.speaker,
        request.context.belief_of(request.speaker),
        &request.transcript,
    )
}

/// Messages for the defender's final decision
pub fn decision_messages(request: &DecisionRequest) -> Vec<ChatMessage> {
    let mut messages = perspective(
        Role::Defender,
        request.context.belief_of(Role::Defender),
        &request.transcript,
    );
    messages.push(ChatMessage::user(DECISION_INSTRUCTION));
    messages
}
