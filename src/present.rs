//! Console presentation of the event stream.
//!
//! The renderer is a pure function of each record plus the [`RunView`] taken
//! from `RunStarted`; [`follow`] drives it from a broadcast subscription and
//! stops when the log is dropped.

use tokio::sync::broadcast::{self, error::RecvError};

use crate::conversation::{ConversationContext, Utterance};
use crate::events::{LogRecord, RunSummary, SimEvent};
use crate::schedule::Role;
use crate::update::{ChangeKind, DecisionOutcome};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const BLUE: &str = "\x1b[34m";

const WRAP_WIDTH: usize = 72;

/// Word-wrap `text` to at most `max_width` characters per line.
pub fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        let current_len = current.chars().count();
        if !current.is_empty() && current_len + 1 + word_len > max_width {
            lines.push(std::mem::take(&mut current));
        }
        if word_len > max_width {
            let chars: Vec<char> = word.chars().collect();
            let mut chunks = chars.chunks(max_width).peekable();
            while let Some(chunk) = chunks.next() {
                if chunks.peek().is_some() {
                    lines.push(chunk.iter().collect());
                } else {
                    current = chunk.iter().collect();
                }
            }
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Belief per agent as an index into `pool`, laid out `columns` wide.
///
/// Beliefs outside the pool (revised by a defender) show as `*`.
pub fn belief_index_grid(beliefs: &[String], pool: &[String], columns: usize) -> String {
    let columns = columns.max(1);
    let rule = "-".repeat(columns * 4 + 1);
    let mut out = format!("{rule}\n");
    for row in beliefs.chunks(columns) {
        let cells: Vec<String> = row
            .iter()
            .map(|belief| match pool.iter().position(|p| p == belief) {
                Some(index) => format!("{index:^3}"),
                None => " * ".to_string(),
            })
            .collect();
        out.push_str(&format!("|{}|\n{rule}\n", cells.join("|")));
    }
    out
}

/// Run-level context the renderer needs beyond a single record
#[derive(Debug, Clone, Default)]
pub struct RunView {
    /// Planned iterations
    pub total: u32,
    /// Belief pool agents were drawn from
    pub pool: Vec<String>,
    /// Grid width used for belief snapshots
    pub columns: usize,
}

impl RunView {
    /// Pick up run parameters from `RunStarted`.
    pub fn observe(&mut self, record: &LogRecord) {
        if let SimEvent::RunStarted {
            info, belief_pool, ..
        } = &record.event
        {
            self.total = info.iterations;
            self.pool = belief_pool.clone();
            self.columns = info.dims.map_or(info.agents, |d| d.cols);
        }
    }
}

/// ANSI console renderer
#[derive(Debug, Clone, Copy)]
pub struct Console {
    color: bool,
}

impl Console {
    /// Renderer with or without ANSI colors
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn paint(&self, style: &str, text: &str) -> String {
        if self.color {
            format!("{style}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    fn role_color(role: Role) -> &'static str {
        match role {
            Role::Persuader => CYAN,
            Role::Defender => YELLOW,
        }
    }

    /// Banner for an interaction
    pub fn interaction_header(
        &self,
        iteration: u32,
        total: u32,
        context: &ConversationContext,
    ) -> String {
        let mut out = String::new();
        out.push('\n');
        out.push_str(&self.paint(BOLD, &format!("Iteration {iteration}/{total}")));
        out.push('\n');
        for role in [Role::Persuader, Role::Defender] {
            let who = context.participant(role);
            out.push_str(&format!(
                "  {} {} {}\n    {}\n",
                self.paint(Self::role_color(role), &format!("{:<9}", role.as_str())),
                who.id,
                self.paint(DIM, &who.position),
                who.belief
            ));
        }
        out
    }

    /// One debate turn
    pub fn utterance(&self, utterance: &Utterance) -> String {
        let mut out = format!(
            "  {} {}\n",
            self.paint(DIM, &format!("[round {}]", utterance.round)),
            self.paint(Self::role_color(utterance.speaker), utterance.speaker.as_str())
        );
        for line in wrap_text(&utterance.text, WRAP_WIDTH) {
            out.push_str(&format!("  {} {}\n", self.paint(BLUE, "|"), line));
        }
        out
    }

    /// The defender's decision
    pub fn decision(&self, outcome: &DecisionOutcome) -> String {
        let (style, label) = match (outcome.parse_error.is_some(), outcome.change) {
            (true, _) => (RED, "UNREADABLE (kept)"),
            (false, ChangeKind::Unchanged) => (RED, "BELIEF UNCHANGED"),
            (false, ChangeKind::Similar) => (YELLOW, "BELIEF REFINED"),
            (false, ChangeKind::Changed) => (GREEN, "BELIEF CHANGED"),
        };
        format!("  {}: {}\n", self.paint(style, label), outcome.decision.belief)
    }

    /// End-of-run summary
    pub fn summary(&self, summary: &RunSummary) -> String {
        let status = if summary.stopped { "stopped" } else { "complete" };
        format!(
            "\n{}\n  iterations {}/{} ({} failed)  changes {}  refinements {}  unreadable {}  change rate {:.1}%\n",
            self.paint(BOLD, &format!("Simulation {status}")),
            summary.attempted(),
            summary.iterations_planned,
            summary.failed,
            summary.belief_changes,
            summary.refinements,
            summary.parse_errors,
            summary.change_rate()
        )
    }

    /// Belief snapshot after an iteration
    pub fn belief_grid(&self, beliefs: &[String], view: &RunView) -> String {
        format!(
            "  {}\n{}",
            self.paint(DIM, "belief indices (* = revised)"),
            belief_index_grid(beliefs, &view.pool, view.columns)
        )
    }

    /// Render a record; `None` for records with nothing to show
    pub fn render(&self, record: &LogRecord, view: &RunView) -> Option<String> {
        match &record.event {
            SimEvent::RunStarted {
                info,
                initial_beliefs,
                ..
            } => Some(format!(
                "{} {} agents on {}, {} rounds x {} iterations, {} via {} (seed {})\n{}",
                self.paint(BOLD, "beliefnet"),
                info.agents,
                info.topology,
                info.rounds,
                info.iterations,
                info.model,
                info.provider,
                info.seed,
                self.belief_grid(initial_beliefs, view)
            )),
            SimEvent::RolesAssigned {
                iteration, context, ..
            } => Some(self.interaction_header(*iteration, view.total, context)),
            SimEvent::Utterance { utterance, .. } => Some(self.utterance(utterance)),
            SimEvent::DecisionMade { outcome, .. } => Some(self.decision(outcome)),
            SimEvent::IterationFailed { error, beliefs, .. } => Some(format!(
                "  {}: {}\n{}",
                self.paint(RED, "SKIPPED"),
                error,
                self.belief_grid(beliefs, view)
            )),
            SimEvent::IterationCompleted { beliefs, .. } => {
                Some(self.belief_grid(beliefs, view))
            },
            SimEvent::RunStopped { after_iterations } => Some(format!(
                "\n{}\n",
                self.paint(YELLOW, &format!("Stop requested after {after_iterations} iterations"))
            )),
            SimEvent::RunFinished { summary, .. } => Some(self.summary(summary)),
            _ => None,
        }
    }
}

/// Print records as they arrive until the sender is dropped.
pub async fn follow(mut rx: broadcast::Receiver<LogRecord>, console: Console) {
    let mut view = RunView::default();
    loop {
        match rx.recv().await {
            Ok(record) => {
                view.observe(&record);
                if let Some(text) = console.render(&record, &view) {
                    print!("{text}");
                }
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("console fell behind; {} records not shown", skipped);
            },
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::interpret;

    #[test]
    fn test_wrap_text() {
        let lines = wrap_text("the quick brown fox jumps over the lazy dog", 10);
        assert!(lines.iter().all(|l| l.chars().count() <= 10));
        assert_eq!(lines.join(" "), "the quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn test_wrap_long_word() {
        let lines = wrap_text("abcdefghij klm", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij", "klm"]);
    }

    #[test]
    fn test_plain_utterance() {
        let console = Console::new(false);
        let text = console.utterance(&Utterance {
            speaker: Role::Persuader,
            round: 2,
            text: "Saving is freedom.".into(),
            elapsed_ms: 0,
        });
        assert_eq!(text, "  [round 2] persuader\n  | Saving is freedom.\n");
    }

    #[test]
    fn test_belief_index_grid_marks_revised() {
        let pool = vec!["I save".to_string(), "I spend".to_string()];
        let beliefs: Vec<String> = ["I save", "I spend", "I rethought", "I save"]
            .iter()
            .map(|b| (*b).to_string())
            .collect();

        let grid = belief_index_grid(&beliefs, &pool, 2);
        assert_eq!(
            grid,
            "---------\n| 0 | 1 |\n---------\n| * | 0 |\n---------\n"
        );
    }

    #[test]
    fn test_render_iteration_snapshot() {
        let console = Console::new(false);
        let view = RunView {
            total: 3,
            pool: vec!["I save".to_string()],
            columns: 3,
        };
        let record = LogRecord {
            seq: 9,
            at: chrono::Utc::now(),
            event: SimEvent::IterationCompleted {
                iteration: 1,
                changed: true,
                beliefs: vec!["I save".into(), "I doubt".into(), "I save".into()],
            },
        };

        let text = console.render(&record, &view).unwrap();
        assert!(text.contains("| 0 | * | 0 |"));
    }

    #[test]
    fn test_decision_labels() {
        let console = Console::new(false);
        let kept = console.decision(&interpret("UNCHANGED", "I save"));
        assert!(kept.contains("BELIEF UNCHANGED"));
        let garbled = console.decision(&interpret("???", "I save"));
        assert!(garbled.contains("UNREADABLE"));
        let changed = console.decision(&interpret("I spend freely", "I save"));
        assert!(changed.contains("BELIEF CHANGED: I spend freely"));
    }
}
