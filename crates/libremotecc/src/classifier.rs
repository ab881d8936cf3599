use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use remotecc_protocol::{AgentState, Question, StateUpdate};

use crate::extract::extract;
use crate::strip::AnsiStripper;

pub const DEFAULT_WINDOW_CAPACITY: usize = 1000;

/// One entry of a classification table. Patterns run against the lower-cased
/// window, so they are written in lower case.
#[derive(Debug)]
pub struct Rule {
    pub name: &'static str,
    pub pattern: Regex,
    pub verdict: AgentState,
}

fn table(verdict: AgentState, rules: &[(&'static str, &str)]) -> Vec<Rule> {
    rules
        .iter()
        .map(|&(name, pattern)| Rule {
            name,
            pattern: Regex::new(pattern).unwrap(),
            verdict,
        })
        .collect()
}

/// Evidence that the agent is busy. Consulted first.
pub static WORKING_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    table(
        AgentState::Working,
        &[
            ("spinner-verb", r"\+[a-z]+\.\.\."),
            ("loading", r"loading\.\.\."),
            ("processing", r"processing\.\.\."),
            ("analyzing", r"analyzing\.\.\."),
            ("thinking", r"thinking\.\.\."),
            ("searching", r"searching\.\.\."),
            ("reading", r"reading\.\.\."),
            ("writing", r"writing\.\.\."),
            ("progress-bar", r"\[=+\]"),
        ],
    )
});

/// Evidence that the agent needs an answer. Any match overrides the working table.
pub static WAITING_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    table(
        AgentState::Waiting,
        &[
            ("trailing-question", r"\?\s*$"),
            ("trailing-prompt", r">\s*$"),
            ("numbered-option", r"\d+[.)]\s+[a-z]"),
            ("cursor", "❯"),
            ("yes-no", r"\(y/n\)"),
            ("press-enter", r"press\s+enter"),
            ("select-option", r"select\s+an\s+option"),
            ("what-would-you-like", r"what\s+would\s+you\s+like"),
            ("waiting-for", r"waiting\s+for\s+(input|you)"),
            ("please-act", r"please\s+(choose|select|enter|type)"),
            ("would-you-like", r"would\s+you\s+like"),
            ("do-you-want", r"do\s+you\s+want"),
            ("how-would", r"how\s+(would|should|can)"),
            ("type-something", r"type\s+something"),
        ],
    )
});

/// Run both tables over already lower-cased text and return the deciding rule.
pub fn classify(lowered: &str) -> Option<&'static Rule> {
    let mut decided = None;
    for rules in [&*WORKING_RULES, &*WAITING_RULES] {
        if let Some(rule) = rules.iter().find(|r| r.pattern.is_match(lowered)) {
            decided = Some(rule);
        }
    }
    decided
}

/// Tracks the agent state from the coalesced output stream.
///
/// Emits an update only on an edge: two consecutive updates never carry the
/// same state.
pub struct StateClassifier {
    stripper: AnsiStripper,
    window: String,
    capacity: usize,
    state: AgentState,
    last_question: Option<Question>,
}

impl StateClassifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            stripper: AnsiStripper::new(),
            window: String::new(),
            capacity: capacity.max(1),
            state: AgentState::Working,
            last_question: None,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn window(&self) -> &str {
        &self.window
    }

    /// Snapshot for a client that just joined.
    pub fn current(&self) -> StateUpdate {
        match (self.state, &self.last_question) {
            (AgentState::Waiting, Some(q)) => StateUpdate::waiting(q.clone()),
            (state, _) => StateUpdate {
                state,
                question: None,
            },
        }
    }

    /// Feed one coalesced frame.
    pub fn observe(&mut self, frame: &[u8]) -> Option<StateUpdate> {
        let text = self.stripper.strip(frame);
        if text.is_empty() {
            return None;
        }
        self.append(&text);

        let candidate = match classify(&self.window.to_lowercase()) {
            Some(rule) => {
                debug!(rule = rule.name, verdict = %rule.verdict, "classifier rule matched");
                rule.verdict
            }
            None => self.state,
        };
        self.transition(candidate)
    }

    /// Manual override from a client. Forcing the current state is a no-op.
    pub fn force(&mut self, state: AgentState) -> Option<StateUpdate> {
        self.transition(state)
    }

    fn transition(&mut self, next: AgentState) -> Option<StateUpdate> {
        if next == self.state {
            return None;
        }
        self.state = next;
        let update = match next {
            AgentState::Waiting => {
                let question = extract(&self.window);
                self.last_question = Some(question.clone());
                StateUpdate::waiting(question)
            }
            AgentState::Working => {
                self.last_question = None;
                StateUpdate::working()
            }
        };
        debug!(state = %next, "agent state changed");
        Some(update)
    }

    fn append(&mut self, text: &str) {
        self.window.push_str(text);
        let excess = self.window.chars().count().saturating_sub(self.capacity);
        if excess > 0 {
            let cut = self
                .window
                .char_indices()
                .nth(excess)
                .map(|(idx, _)| idx)
                .unwrap_or(self.window.len());
            self.window.drain(..cut);
        }
    }
}

impl Default for StateClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}
