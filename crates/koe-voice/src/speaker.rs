//! Speaker profiles: VOICEVOX style id plus optional prosody overrides.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};

/// A named voice configuration. Selected once per session and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerProfile {
    /// VOICEVOX style id sent as `speaker=` on both engine calls.
    pub id: u32,
    /// Name used in logs and in the hosted persona prompt.
    pub display_name: String,
    /// Overrides `speedScale` on the synthesis query when set.
    #[serde(default)]
    pub speed_scale: Option<f64>,
    /// Overrides `pitchScale` on the synthesis query when set.
    #[serde(default)]
    pub pitch_scale: Option<f64>,
    /// Overrides `pauseLength` on the synthesis query when set.
    #[serde(default)]
    pub pause_length: Option<f64>,
}

impl SpeakerProfile {
    /// Profile without overrides; the engine's own parameters are kept.
    pub fn new(id: u32, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            speed_scale: None,
            pitch_scale: None,
            pause_length: None,
        }
    }

    pub fn with_speed_scale(mut self, v: f64) -> Self {
        self.speed_scale = Some(v);
        self
    }

    pub fn with_pitch_scale(mut self, v: f64) -> Self {
        self.pitch_scale = Some(v);
        self
    }

    pub fn with_pause_length(mut self, v: f64) -> Self {
        self.pause_length = Some(v);
        self
    }

    /// True when at least one field of the query document will be overridden.
    pub fn has_overrides(&self) -> bool {
        self.speed_scale.is_some() || self.pitch_scale.is_some() || self.pause_length.is_some()
    }
}

/// Fixed lookup table of speakers, keyed by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeakerTable {
    profiles: Vec<SpeakerProfile>,
}

impl SpeakerTable {
    /// Build a table. Duplicate ids are a configuration error.
    pub fn new(profiles: Vec<SpeakerProfile>) -> VoiceResult<Self> {
        let table = Self { profiles };
        table.validate()?;
        Ok(table)
    }

    /// Re-check a table that was deserialized rather than built with [`SpeakerTable::new`].
    pub fn validate(&self) -> VoiceResult<()> {
        if self.profiles.is_empty() {
            return Err(VoiceError::Config("speaker table is empty".to_string()));
        }
        for (i, p) in self.profiles.iter().enumerate() {
            if self.profiles[..i].iter().any(|q| q.id == p.id) {
                return Err(VoiceError::Config(format!(
                    "speaker id {} is defined more than once",
                    p.id
                )));
            }
        }
        Ok(())
    }

    /// The three voices the conversation scripts ship with.
    pub fn builtin() -> Self {
        Self {
            profiles: vec![
                SpeakerProfile::new(0, "四国めたん")
                    .with_speed_scale(1.0)
                    .with_pitch_scale(0.03)
                    .with_pause_length(0.3),
                SpeakerProfile::new(1, "ずんだもん")
                    .with_speed_scale(1.5)
                    .with_pitch_scale(0.03)
                    .with_pause_length(0.3),
                SpeakerProfile::new(2, "春日部つむぎ")
                    .with_speed_scale(1.3)
                    .with_pitch_scale(0.03)
                    .with_pause_length(0.3),
            ],
        }
    }

    /// Look up a profile. Missing ids fail instead of falling back to a default voice.
    pub fn get(&self, id: u32) -> VoiceResult<&SpeakerProfile> {
        self.profiles
            .iter()
            .find(|p| p.id == id)
            .ok_or(VoiceError::UnknownSpeaker(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpeakerProfile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for SpeakerTable {
    fn default() -> Self {
        Self::builtin()
    }
}
