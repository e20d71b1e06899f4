//! The conversation loop: prompt, generate, speak, repeat.
//!
//! ```text
//!  AwaitingInput ──line──▶ Processing ──(spoken | skipped | failed)──▶ AwaitingInput
//!        │                     │
//!        │ exit / Ctrl-C / EOF │ interrupt at a stage boundary
//!        ▼                     ▼
//!     Stopped ◀────────────────┘
//! ```
//!
//! Everything that goes wrong inside `Processing` stays inside that turn: it is
//! written to the user-facing output with a hint, logged, and the loop carries on.

use crate::error::CoreResult;
use crate::generation::ResponseGenerator;
use crate::turn::{
    ConversationState, ConversationSummary, ConversationTurn, InputEvent, StopReason, TurnOutcome,
};
use koe_voice::{AudioSink, SpeakerProfile, SpeechSynthesizer, VoiceError};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_EXIT_KEYWORD: &str = "exit";
pub const DEFAULT_PROMPT: &str = "You: ";
const RESPONSE_LABEL: &str = "Assistant: ";

/// Source of user lines (terminal, script, test double).
pub trait LineSource {
    /// Show `prompt` and wait for one line.
    fn read_line(&mut self, prompt: &str) -> InputEvent;
}

/// Drives turns through the generator, synthesizer and sink, one at a time.
pub struct Conversation<'a> {
    generator: &'a dyn ResponseGenerator,
    synthesizer: &'a dyn SpeechSynthesizer,
    sink: &'a dyn AudioSink,
    speaker: &'a SpeakerProfile,
    exit_keyword: String,
    prompt: String,
    interrupt: Arc<AtomicBool>,
    state: ConversationState,
}

impl<'a> Conversation<'a> {
    pub fn new(
        generator: &'a dyn ResponseGenerator,
        synthesizer: &'a dyn SpeechSynthesizer,
        sink: &'a dyn AudioSink,
        speaker: &'a SpeakerProfile,
    ) -> Self {
        Self {
            generator,
            synthesizer,
            sink,
            speaker,
            exit_keyword: DEFAULT_EXIT_KEYWORD.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            interrupt: Arc::new(AtomicBool::new(false)),
            state: ConversationState::AwaitingInput,
        }
    }

    pub fn with_exit_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.exit_keyword = keyword.into().trim().to_string();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Share the flag a Ctrl-C handler raises.
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn speaker(&self) -> &SpeakerProfile {
        self.speaker
    }

    /// Exit keyword match: trimmed, case-insensitive.
    pub fn is_exit_command(&self, line: &str) -> bool {
        line.trim().to_lowercase() == self.exit_keyword.to_lowercase()
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Run until the exit keyword, an interrupt, or end of input.
    ///
    /// Only a failure to write to `out` ends the loop with an error.
    pub fn run(
        &mut self,
        input: &mut dyn LineSource,
        out: &mut dyn Write,
    ) -> CoreResult<ConversationSummary> {
        info!(
            backend = self.generator.name(),
            speaker = self.speaker.id,
            name = %self.speaker.display_name,
            "🎭 Conversation started"
        );
        let mut summary = ConversationSummary::new();

        let stop_reason = loop {
            if self.interrupted() {
                break StopReason::Interrupted;
            }
            self.state = ConversationState::AwaitingInput;

            let line = match input.read_line(&self.prompt) {
                InputEvent::Line(line) => line,
                InputEvent::Interrupted => break StopReason::Interrupted,
                InputEvent::Closed => break StopReason::InputClosed,
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if self.is_exit_command(text) {
                break StopReason::ExitKeyword;
            }

            self.state = ConversationState::Processing;
            let outcome = self.process_turn(text, out)?;
            summary.record(outcome);
            if outcome == TurnOutcome::Interrupted {
                break StopReason::Interrupted;
            }
        };

        self.state = ConversationState::Stopped;
        summary.stop_reason = stop_reason;
        info!(
            turns = summary.turns,
            spoken = summary.spoken,
            skipped = summary.skipped,
            failed = summary.failed,
            reason = ?stop_reason,
            "🛑 Conversation stopped"
        );
        Ok(summary)
    }

    /// One `Processing` step for `user_text`. Stage failures become the returned outcome.
    pub fn process_turn(&self, user_text: &str, out: &mut dyn Write) -> CoreResult<TurnOutcome> {
        let generated = self.generator.try_generate(user_text);
        if self.interrupted() {
            return Ok(TurnOutcome::Interrupted);
        }
        let assistant_text = match generated {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(backend = self.generator.name(), error = %e, "Conversation: generation failed");
                writeln!(out, "No response ({}); skipping speech.", e)?;
                if let Some(hint) = e.hint() {
                    writeln!(out, "  hint: {}", hint)?;
                }
                return Ok(TurnOutcome::NoResponse);
            }
        };
        if assistant_text.is_empty() {
            warn!(backend = self.generator.name(), "Conversation: empty response, skipping synthesis");
            writeln!(out, "No response (the generator returned no text); skipping speech.")?;
            return Ok(TurnOutcome::NoResponse);
        }

        let turn = ConversationTurn::new(user_text, assistant_text);
        writeln!(out, "{}{}", RESPONSE_LABEL, turn.assistant_text)?;
        debug!(at = %turn.timestamp, chars = turn.assistant_text.chars().count(), "Conversation: response ready");

        let audio = match self.synthesizer.synthesize(&turn.assistant_text, self.speaker) {
            Ok(audio) => audio,
            Err(_) if self.interrupted() => return Ok(TurnOutcome::Interrupted),
            Err(e) => {
                report(out, "Speech synthesis failed", &e)?;
                return Ok(TurnOutcome::SynthesisFailed);
            }
        };
        if self.interrupted() {
            return Ok(TurnOutcome::Interrupted);
        }

        match self.sink.play(audio) {
            Ok(()) => Ok(TurnOutcome::Spoken),
            // Ctrl-C also reaches the player process; that is not a playback fault.
            Err(_) if self.interrupted() => Ok(TurnOutcome::Interrupted),
            Err(e) => {
                report(out, "Playback failed", &e)?;
                Ok(TurnOutcome::PlaybackFailed)
            }
        }
    }
}

fn report(out: &mut dyn Write, what: &str, err: &VoiceError) -> CoreResult<()> {
    warn!(error = %err, "Conversation: {}", what);
    writeln!(out, "{}: {}", what, err)?;
    if let Some(hint) = err.hint() {
        writeln!(out, "  hint: {}", hint)?;
    }
    Ok(())
}
