//! **Synthesis**: text to WAV through a VOICEVOX engine.
//!
//! Two sequential calls per utterance: `POST /audio_query` builds a query document,
//! the speaker's prosody overrides are written into it, then `POST /synthesis`
//! renders it. Each call has its own finite timeout; synthesis is the slower one.

use crate::audio::AudioBuffer;
use crate::error::{SynthesisStep, VoiceError, VoiceResult};
use crate::speaker::SpeakerProfile;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Default VOICEVOX engine address (the engine's own default port).
pub const DEFAULT_VOICEVOX_URL: &str = "http://127.0.0.1:50021";
/// Default deadline for `/audio_query`.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Default deadline for `/synthesis`.
pub const DEFAULT_SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend that turns text into playable audio for a given speaker.
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with `speaker`. Never returns an empty buffer on success.
    fn synthesize(&self, text: &str, speaker: &SpeakerProfile) -> VoiceResult<AudioBuffer>;
}

/// The engine's intermediate query document.
///
/// Kept as an untyped JSON object: only the three prosody fields are ever
/// rewritten, everything else (accent phrases, mora timings, ...) goes back to
/// the engine untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SynthesisQuery(Map<String, Value>);

impl SynthesisQuery {
    pub const SPEED_SCALE: &'static str = "speedScale";
    pub const PITCH_SCALE: &'static str = "pitchScale";
    pub const PAUSE_LENGTH: &'static str = "pauseLength";

    /// Parse the `/audio_query` body. Anything but a JSON object is rejected.
    pub fn from_json(body: &str) -> Result<Self, String> {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
            Err(e) => Err(format!("invalid JSON: {}", e)),
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn set_f64(&mut self, key: &str, value: f64) {
        self.0.insert(key.to_string(), Value::from(value));
    }

    /// Write the speaker's overrides over the engine-provided values.
    pub fn apply_overrides(&mut self, speaker: &SpeakerProfile) {
        if let Some(v) = speaker.speed_scale {
            self.set_f64(Self::SPEED_SCALE, v);
        }
        if let Some(v) = speaker.pitch_scale {
            self.set_f64(Self::PITCH_SCALE, v);
        }
        if let Some(v) = speaker.pause_length {
            self.set_f64(Self::PAUSE_LENGTH, v);
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Blocking VOICEVOX client. Holds no per-utterance state.
#[derive(Debug, Clone)]
pub struct VoicevoxClient {
    /// Base URL without trailing slash (e.g. http://127.0.0.1:50021).
    base_url: String,
    query_timeout: Duration,
    synthesis_timeout: Duration,
    client: reqwest::blocking::Client,
}

impl VoicevoxClient {
    /// Create a client. Both timeouts must be non-zero and the query step may not
    /// be given more time than the synthesis step.
    pub fn new(
        base_url: impl Into<String>,
        query_timeout: Duration,
        synthesis_timeout: Duration,
    ) -> VoiceResult<Self> {
        if query_timeout.is_zero() || synthesis_timeout.is_zero() {
            return Err(VoiceError::Config(
                "VOICEVOX timeouts must be greater than zero".to_string(),
            ));
        }
        if query_timeout > synthesis_timeout {
            return Err(VoiceError::Config(format!(
                "audio_query timeout ({:?}) must not exceed synthesis timeout ({:?})",
                query_timeout, synthesis_timeout
            )));
        }
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(VoiceError::Config("VOICEVOX base URL is empty".to_string()));
        }
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(query_timeout)
            .build()
            .map_err(|e| VoiceError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            base_url,
            query_timeout,
            synthesis_timeout,
            client,
        })
    }

    /// Client for the default local engine with default timeouts.
    pub fn local() -> VoiceResult<Self> {
        Self::new(DEFAULT_VOICEVOX_URL, DEFAULT_QUERY_TIMEOUT, DEFAULT_SYNTHESIS_TIMEOUT)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Step 1: build the query document for `text` spoken by `speaker_id`.
    pub fn audio_query(&self, text: &str, speaker_id: u32) -> VoiceResult<SynthesisQuery> {
        let step = SynthesisStep::AudioQuery;
        let url = format!("{}/audio_query", self.base_url);
        let speaker = speaker_id.to_string();
        debug!(speaker_id, chars = text.chars().count(), "VOICEVOX: audio_query");

        let res = self
            .client
            .post(&url)
            .query(&[("text", text), ("speaker", speaker.as_str())])
            .timeout(self.query_timeout)
            .send()
            .map_err(|e| transport_error(step, self.query_timeout, e))?;
        let res = ensure_success(step, res)?;
        let status = res.status().as_u16();
        let body = res
            .text()
            .map_err(|e| transport_error(step, self.query_timeout, e))?;

        SynthesisQuery::from_json(&body).map_err(|message| VoiceError::SynthesisRejected {
            step,
            status,
            message,
        })
    }

    /// Step 2: render a (possibly modified) query document to WAV.
    pub fn synthesis(&self, query: &SynthesisQuery, speaker_id: u32) -> VoiceResult<AudioBuffer> {
        let step = SynthesisStep::Synthesis;
        let url = format!("{}/synthesis", self.base_url);
        let speaker = speaker_id.to_string();
        debug!(speaker_id, "VOICEVOX: synthesis");

        let res = self
            .client
            .post(&url)
            .query(&[("speaker", speaker.as_str())])
            .json(query)
            .timeout(self.synthesis_timeout)
            .send()
            .map_err(|e| transport_error(step, self.synthesis_timeout, e))?;
        let res = ensure_success(step, res)?;
        let status = res.status().as_u16();
        let bytes = res
            .bytes()
            .map_err(|e| transport_error(step, self.synthesis_timeout, e))?;

        if bytes.is_empty() {
            return Err(VoiceError::SynthesisRejected {
                step,
                status,
                message: "engine returned an empty audio body".to_string(),
            });
        }
        Ok(AudioBuffer::new(bytes.to_vec()))
    }

    /// Engine version string (`GET /version`). Used as a startup reachability probe.
    pub fn version(&self) -> VoiceResult<String> {
        let step = SynthesisStep::Version;
        let url = format!("{}/version", self.base_url);
        let res = self
            .client
            .get(&url)
            .timeout(self.query_timeout)
            .send()
            .map_err(|e| transport_error(step, self.query_timeout, e))?;
        let res = ensure_success(step, res)?;
        let body = res
            .text()
            .map_err(|e| transport_error(step, self.query_timeout, e))?;
        // The engine answers with a JSON string literal ("0.14.7").
        Ok(serde_json::from_str::<String>(&body).unwrap_or_else(|_| body.trim().to_string()))
    }
}

impl SpeechSynthesizer for VoicevoxClient {
    fn synthesize(&self, text: &str, speaker: &SpeakerProfile) -> VoiceResult<AudioBuffer> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VoiceError::EmptyText);
        }
        let mut query = self.audio_query(text, speaker.id)?;
        if speaker.has_overrides() {
            query.apply_overrides(speaker);
            debug!(
                speaker = %speaker.display_name,
                speed_scale = ?speaker.speed_scale,
                pitch_scale = ?speaker.pitch_scale,
                pause_length = ?speaker.pause_length,
                "VOICEVOX: applied speaker overrides"
            );
        }
        let audio = self.synthesis(&query, speaker.id)?;
        info!(
            speaker = %speaker.display_name,
            bytes = audio.len(),
            "VOICEVOX: synthesized utterance"
        );
        Ok(audio)
    }
}

fn transport_error(step: SynthesisStep, timeout: Duration, err: reqwest::Error) -> VoiceError {
    if err.is_timeout() {
        VoiceError::SynthesisTimeout { step, timeout }
    } else {
        VoiceError::SynthesisUnavailable {
            step,
            message: err.to_string(),
        }
    }
}

fn ensure_success(
    step: SynthesisStep,
    res: reqwest::blocking::Response,
) -> VoiceResult<reqwest::blocking::Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().unwrap_or_default();
    Err(VoiceError::SynthesisRejected {
        step,
        status: status.as_u16(),
        message: body.chars().take(200).collect(),
    })
}
