//! Per-turn records and the conversation state machine's vocabulary.

use chrono::{DateTime, Utc};

/// One completed exchange. Lives for a single loop iteration; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub user_text: String,
    pub assistant_text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(user_text: impl Into<String>, assistant_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            assistant_text: assistant_text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Where the conversation loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    AwaitingInput,
    Processing,
    Stopped,
}

/// What the input side produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    /// Ctrl-C while waiting for input.
    Interrupted,
    /// Ctrl-D or closed stdin.
    Closed,
}

/// How a single `Processing` step ended. Only `Spoken` means audio was played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Spoken,
    /// Generator produced blank text; synthesis skipped.
    NoResponse,
    SynthesisFailed,
    PlaybackFailed,
    /// Interrupt observed at a stage boundary; remaining stages skipped.
    Interrupted,
}

impl TurnOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TurnOutcome::SynthesisFailed | TurnOutcome::PlaybackFailed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ExitKeyword,
    Interrupted,
    InputClosed,
}

/// Returned by [`crate::Conversation::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationSummary {
    /// Inputs that entered `Processing`.
    pub turns: usize,
    pub spoken: usize,
    /// Turns whose generator output was blank.
    pub skipped: usize,
    /// Synthesis or playback failures.
    pub failed: usize,
    pub stop_reason: StopReason,
}

impl ConversationSummary {
    pub(crate) fn new() -> Self {
        Self {
            turns: 0,
            spoken: 0,
            skipped: 0,
            failed: 0,
            stop_reason: StopReason::InputClosed,
        }
    }

    pub(crate) fn record(&mut self, outcome: TurnOutcome) {
        self.turns += 1;
        match outcome {
            TurnOutcome::Spoken => self.spoken += 1,
            TurnOutcome::NoResponse => self.skipped += 1,
            TurnOutcome::SynthesisFailed | TurnOutcome::PlaybackFailed => self.failed += 1,
            TurnOutcome::Interrupted => {}
        }
    }
}
