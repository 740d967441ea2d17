//! Defender belief updates.
//!
//! After a debate closes the defender is asked one final question. The reply is
//! interpreted conservatively: anything that is neither an explicit "unchanged"
//! nor a recognisable belief statement counts as no change and is flagged as a
//! parse error in the log.

use std::fmt;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::backend::{call_with_retry, Collaborator, DecisionRequest, ExponentialBackoff};
use crate::conversation::{ConversationContext, Transcript};
use crate::error::{Result, SimError};
use crate::registry::AgentRegistry;
use crate::schedule::RoleAssignment;

lazy_static! {
    /// Explicit "keep my belief" replies
    static ref UNCHANGED_REGEX: Option<Regex> =
        Regex::new(r"(?i)^\W*(unchanged|no change|keep(ing)? (it|my belief))\W*$").ok();

    /// Leading label some models put in front of the belief
    static ref LABEL_REGEX: Option<Regex> =
        Regex::new(r"(?i)^(new |final |updated )?belief\s*:\s*").ok();
}

/// Number of leading characters compared when classifying a change as similar
pub const SIMILAR_PREFIX_CHARS: usize = 20;

/// The defender's decision for one interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the defender adopts a new belief
    pub updated: bool,
    /// The defender's belief after the interaction
    pub belief: String,
}

impl Decision {
    /// Keep `belief`
    pub fn unchanged(belief: impl Into<String>) -> Self {
        Self {
            updated: false,
            belief: belief.into(),
        }
    }

    /// Adopt `belief`
    pub fn adopt(belief: impl Into<String>) -> Self {
        Self {
            updated: true,
            belief: belief.into(),
        }
    }
}

/// How far a belief moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Same text, ignoring case and surrounding whitespace
    Unchanged,
    /// Same opening, different elsewhere
    Similar,
    /// Different
    Changed,
}

impl ChangeKind {
    /// Classify the move from `old` to `new`.
    pub fn classify(old: &str, new: &str) -> Self {
        let old = old.trim().to_lowercase();
        let new = new.trim().to_lowercase();
        if old == new {
            return ChangeKind::Unchanged;
        }
        let prefix = |s: &str| s.chars().take(SIMILAR_PREFIX_CHARS).collect::<String>();
        if prefix(&old) == prefix(&new) {
            ChangeKind::Similar
        } else {
            ChangeKind::Changed
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Unchanged => "unchanged",
            ChangeKind::Similar => "similar",
            ChangeKind::Changed => "changed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Interpreted reply plus everything needed to log it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    /// What will be applied
    pub decision: Decision,
    /// Classification against the previous belief
    pub change: ChangeKind,
    /// Reply as received
    pub raw_reply: String,
    /// Set when the reply could not be interpreted
    pub parse_error: Option<String>,
}

#[derive(Deserialize)]
struct StructuredReply {
    updated: bool,
    #[serde(default)]
    belief: Option<String>,
}

fn is_belief_statement(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next() == Some('I') && chars.next().map_or(false, |c| !c.is_alphabetic())
}

fn clean_line(line: &str) -> &str {
    let line = line.trim().trim_matches(|c: char| matches!(c, '"' | '*' | '`' | '\u{201c}' | '\u{201d}'));
    let line = match LABEL_REGEX.as_ref().and_then(|r| r.find(line)) {
        Some(m) => &line[m.end()..],
        None => line,
    };
    line.trim().trim_matches(|c: char| matches!(c, '"' | '\u{201c}' | '\u{201d}'))
}

fn parse_reply(reply: &str) -> std::result::Result<Option<String>, String> {
    let text = reply.trim();
    if text.is_empty() {
        return Err("empty reply".to_string());
    }

    if text.starts_with('{') {
        if let Ok(structured) = serde_json::from_str::<StructuredReply>(text) {
            return match (structured.updated, structured.belief) {
                (false, _) => Ok(None),
                (true, Some(belief)) if !belief.trim().is_empty() => Ok(Some(belief.trim().to_string())),
                (true, _) => Err("structured reply marked updated without a belief".to_string()),
            };
        }
    }

    let first = text
        .lines()
        .map(clean_line)
        .find(|l| !l.is_empty())
        .unwrap_or_default();

    if UNCHANGED_REGEX.as_ref().map_or(false, |r| r.is_match(first)) {
        return Ok(None);
    }
    if is_belief_statement(first) {
        return Ok(Some(first.to_string()));
    }

    let preview: String = first.chars().take(60).collect();
    Err(format!("not a belief statement: {preview:?}"))
}

/// Interpret a raw decision reply against the defender's current belief.
///
/// Never fails: undeterminable replies become "no change" with
/// `parse_error` set.
pub fn interpret(reply: &str, current: &str) -> DecisionOutcome {
    let (decision, parse_error) = match parse_reply(reply) {
        Ok(Some(belief)) if ChangeKind::classify(current, &belief) != ChangeKind::Unchanged => {
            (Decision::adopt(belief), None)
        },
        Ok(_) => (Decision::unchanged(current), None),
        Err(e) => (Decision::unchanged(current), Some(e)),
    };

    DecisionOutcome {
        change: ChangeKind::classify(current, &decision.belief),
        decision,
        raw_reply: reply.to_string(),
        parse_error,
    }
}

/// Asks the defender for its decision
#[derive(Debug, Clone)]
pub struct UpdateEngine {
    /// Bound on the decision request
    pub request_timeout: Duration,
    /// Retry policy for the decision request
    pub retry: ExponentialBackoff,
}

impl UpdateEngine {
    /// Query the collaborator and interpret the reply.
    ///
    /// Fails only when the collaborator exhausts its retries.
    pub async fn decide(
        &self,
        collaborator: &dyn Collaborator,
        context: &ConversationContext,
        transcript: &Transcript,
    ) -> Result<DecisionOutcome> {
        let request = DecisionRequest {
            context: context.clone(),
            transcript: transcript.utterances().to_vec(),
        };
        let request = &request;
        let reply = call_with_retry(&self.retry, self.request_timeout, "decision", || {
            collaborator.decide(request)
        })
        .await?;

        let outcome = interpret(&reply, &context.defender.belief);
        if let Some(e) = &outcome.parse_error {
            tracing::warn!("{}: {}", SimError::DecisionParse(e.clone()), context.defender.id);
        }
        Ok(outcome)
    }
}

/// Apply a decision to the defender of `roles`.
///
/// Consumes the decision so it cannot be applied twice. Returns whether the
/// registry changed.
pub fn apply(registry: &mut AgentRegistry, roles: &RoleAssignment, decision: Decision) -> Result<bool> {
    if !decision.updated {
        // Still validates the id.
        registry.get(roles.defender)?;
        return Ok(false);
    }
    registry.set_belief(roles.defender, decision.belief)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentId;
    use crate::schedule::RoleRationale;

    const OLD: &str = "I believe money buys freedom";

    #[test]
    fn test_classify() {
        assert_eq!(ChangeKind::classify("I like tea", "  i like TEA "), ChangeKind::Unchanged);
        assert_eq!(
            ChangeKind::classify(
                "I believe money buys freedom",
                "I believe money buys nothing"
            ),
            ChangeKind::Similar
        );
        assert_eq!(ChangeKind::classify("I like tea", "I prefer coffee"), ChangeKind::Changed);
    }

    #[test]
    fn test_unchanged_token() {
        for reply in ["UNCHANGED", "  unchanged. ", "**UNCHANGED**", "No change", "Keep my belief."] {
            let outcome = interpret(reply, OLD);
            assert!(!outcome.decision.updated, "{reply}");
            assert_eq!(outcome.decision.belief, OLD);
            assert!(outcome.parse_error.is_none(), "{reply}");
            assert_eq!(outcome.change, ChangeKind::Unchanged);
        }
    }

    #[test]
    fn test_new_belief_statement() {
        let outcome = interpret("I think balance matters more than wealth.\n\nExtra chatter", OLD);
        assert!(outcome.decision.updated);
        assert_eq!(outcome.decision.belief, "I think balance matters more than wealth.");
        assert_eq!(outcome.change, ChangeKind::Changed);
        assert!(outcome.parse_error.is_none());
    }

    #[test]
    fn test_labelled_and_quoted() {
        let outcome = interpret("New belief: \"I'm convinced saving is wise\"", OLD);
        assert!(outcome.decision.updated);
        assert_eq!(outcome.decision.belief, "I'm convinced saving is wise");
    }

    #[test]
    fn test_restating_old_belief_is_not_an_update() {
        let outcome = interpret("  I believe MONEY buys freedom ", OLD);
        assert!(!outcome.decision.updated);
        assert_eq!(outcome.decision.belief, OLD);
        assert!(outcome.parse_error.is_none());
    }

    #[test]
    fn test_structured_reply() {
        let outcome = interpret(r#"{"updated": true, "belief": "I value time"}"#, OLD);
        assert_eq!(outcome.decision, Decision::adopt("I value time"));

        let outcome = interpret(r#"{"updated": false}"#, OLD);
        assert_eq!(outcome.decision, Decision::unchanged(OLD));
        assert!(outcome.parse_error.is_none());
    }

    #[test]
    fn test_garbled_reply_is_parse_error() {
        for reply in ["", "   ", "~~ static ~~", "Interesting debate!", r#"{"updated": true}"#] {
            let outcome = interpret(reply, OLD);
            assert!(!outcome.decision.updated, "{reply}");
            assert_eq!(outcome.decision.belief, OLD);
            assert!(outcome.parse_error.is_some(), "{reply}");
            assert_eq!(outcome.raw_reply, reply);
        }
    }

    #[test]
    fn test_apply_touches_only_defender() {
        let mut registry =
            AgentRegistry::from_beliefs(vec!["a".into(), "b".into(), "c".into()]);
        let roles = RoleAssignment {
            persuader: AgentId(0),
            defender: AgentId(2),
            rationale: RoleRationale::InitiatorPersuades,
        };

        assert!(apply(&mut registry, &roles, Decision::adopt("I agree with a")).unwrap());
        assert_eq!(registry.snapshot(), vec!["a", "b", "I agree with a"]);

        assert!(!apply(&mut registry, &roles, Decision::unchanged("ignored")).unwrap());
        assert_eq!(registry.snapshot(), vec!["a", "b", "I agree with a"]);
    }

    #[test]
    fn test_apply_unknown_defender() {
        let mut registry = AgentRegistry::from_beliefs(vec!["a".into()]);
        let roles = RoleAssignment {
            persuader: AgentId(0),
            defender: AgentId(9),
            rationale: RoleRationale::PartnerPersuades,
        };
        assert!(matches!(
            apply(&mut registry, &roles, Decision::adopt("x")),
            Err(SimError::InvalidAgent(AgentId(9)))
        ));
    }
}
