//! Error types for the Koe voice layer

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Which of the two VOICEVOX calls an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStep {
    /// `POST /audio_query` (query construction)
    AudioQuery,
    /// `POST /synthesis` (waveform rendering)
    Synthesis,
    /// `GET /version` (startup probe)
    Version,
}

impl fmt::Display for SynthesisStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesisStep::AudioQuery => f.write_str("audio_query"),
            SynthesisStep::Synthesis => f.write_str("synthesis"),
            SynthesisStep::Version => f.write_str("version"),
        }
    }
}

/// Errors that can occur while synthesizing or playing speech
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Unknown speaker id {0}")]
    UnknownSpeaker(u32),

    #[error("Nothing to synthesize: text is empty")]
    EmptyText,

    #[error("VOICEVOX engine unreachable during {step}: {message}")]
    SynthesisUnavailable { step: SynthesisStep, message: String },

    #[error("VOICEVOX engine rejected {step} ({status}): {message}")]
    SynthesisRejected {
        step: SynthesisStep,
        status: u16,
        message: String,
    },

    #[error("VOICEVOX {step} timed out after {timeout:?}")]
    SynthesisTimeout { step: SynthesisStep, timeout: Duration },

    #[error("Audio playback unavailable: {0}")]
    PlaybackUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// True for the three engine-side failure kinds.
    pub fn is_synthesis(&self) -> bool {
        matches!(
            self,
            VoiceError::SynthesisUnavailable { .. }
                | VoiceError::SynthesisRejected { .. }
                | VoiceError::SynthesisTimeout { .. }
        )
    }

    /// Short operator hint printed next to the error in the conversation loop.
    pub fn hint(&self) -> Option<&'static str> {
        if self.is_synthesis() {
            return Some(
                "Check that the VOICEVOX engine (e.g. its Docker container) is running and the URL is correct.",
            );
        }
        match self {
            VoiceError::PlaybackUnavailable(_) => {
                Some("Check that the audio player (e.g. 'aplay') is installed and an output device is available.")
            }
            VoiceError::UnknownSpeaker(_) => Some("Run `koe speakers` to list the configured speaker ids."),
            _ => None,
        }
    }
}
