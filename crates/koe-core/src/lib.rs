//! # Koe Core - configuration, generation backends and the conversation loop
//!
//! Wires a [`ResponseGenerator`] (local TGI-style server or Gemini) to the
//! speech side in `koe-voice`. Everything is synchronous: one turn at a time,
//! each external call bounded by its own timeout.
//!
//! ```text
//! user line ─▶ ResponseGenerator ─▶ text ─▶ SpeechSynthesizer ─▶ WAV ─▶ AudioSink
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod generation;
pub mod turn;

pub use config::{KoeConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
pub use conversation::{Conversation, LineSource, DEFAULT_EXIT_KEYWORD, DEFAULT_PROMPT};
pub use error::{CoreError, CoreResult};
pub use generation::{
    create_generator, BackendKind, HostedGenerator, LocalGenerator, Persona, ResponseGenerator,
    SamplingConfig,
};
pub use turn::{
    ConversationState, ConversationSummary, ConversationTurn, InputEvent, StopReason, TurnOutcome,
};
