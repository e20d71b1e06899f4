//! # Koe Voice - VOICEVOX speech for the conversation loop
//!
//! Turns assistant text into sound in two hops: a blocking VOICEVOX client that
//! produces WAV bytes, and a playback sink that plays them to completion.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  text + SpeakerProfile                                        │
//! │        ↓                                                      │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐       │
//! │  │ audio_query  │ → │  overrides   │ → │  synthesis   │       │
//! │  │   (10s cap)  │   │ speed/pitch/ │   │   (30s cap)  │       │
//! │  └──────────────┘   │    pause     │   └──────────────┘       │
//! │                     └──────────────┘          ↓               │
//! │                                        AudioBuffer (WAV)      │
//! │                                               ↓               │
//! │                     ┌──────────────────────────────────┐      │
//! │                     │ AudioSink: aplay on koe-*.wav    │      │
//! │                     │        or rodio (native-audio)   │      │
//! │                     └──────────────────────────────────┘      │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod error;
pub mod playback;
pub mod speaker;
pub mod synthesis;

pub use audio::AudioBuffer;
pub use error::{SynthesisStep, VoiceError, VoiceResult};
#[cfg(feature = "native-audio")]
pub use playback::RodioSink;
pub use playback::{create_sink, AudioSink, CommandSink, PlaybackMode, PlayerCommand};
pub use speaker::{SpeakerProfile, SpeakerTable};
pub use synthesis::{
    SpeechSynthesizer, SynthesisQuery, VoicevoxClient, DEFAULT_QUERY_TIMEOUT,
    DEFAULT_SYNTHESIS_TIMEOUT, DEFAULT_VOICEVOX_URL,
};
