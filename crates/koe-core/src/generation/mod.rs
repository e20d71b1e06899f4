//! Response generation: user utterance in, assistant text out.
//!
//! [`ResponseGenerator::try_generate`] reports failures; [`ResponseGenerator::generate`]
//! swallows them (logged) and returns an empty string, which callers read as
//! "no usable response".

pub mod hosted;
pub mod local;

pub use hosted::{HostedGenerator, Persona};
pub use local::{LocalGenerator, LocalPreset, Precision, Quantization, ServerInfo};

use crate::config::KoeConfig;
use crate::error::{CoreError, CoreResult};
use koe_voice::SpeakerProfile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Which generation backend drives the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Causal LM served over HTTP on this machine.
    Local,
    /// Gemini `generateContent`.
    #[default]
    Hosted,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Hosted => write!(f, "hosted"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "hosted" | "gemini" => Ok(BackendKind::Hosted),
            other => Err(format!("unknown backend '{}' (expected local or hosted)", other)),
        }
    }
}

/// Sampling parameters shared by both backends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_new_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_new_tokens: 512,
        }
    }
}

impl SamplingConfig {
    /// temperature in (0, 2], top_p in (0, 1], max_new_tokens > 0.
    pub fn validate(&self) -> CoreResult<()> {
        if !(self.temperature > 0.0 && self.temperature <= 2.0) {
            return Err(CoreError::Config(format!(
                "temperature {} is outside (0, 2]",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(CoreError::Config(format!(
                "top_p {} is outside (0, 1]",
                self.top_p
            )));
        }
        if self.max_new_tokens == 0 {
            return Err(CoreError::Config(
                "max_new_tokens must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Produces assistant text for one user utterance.
pub trait ResponseGenerator: Send + Sync {
    /// Short backend label for logs.
    fn name(&self) -> &'static str;

    fn try_generate(&self, user_text: &str) -> CoreResult<String>;

    /// Never fails: errors are logged and become `""`.
    fn generate(&self, user_text: &str) -> String {
        match self.try_generate(user_text) {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(backend = self.name(), "Generation: {}", e);
                String::new()
            }
        }
    }
}

/// Build the backend selected in `config`, with `speaker` as the hosted persona.
///
/// Startup failures (missing API key, local server not serving a model) are returned,
/// so the caller can stop before the first prompt.
pub fn create_generator(
    config: &KoeConfig,
    speaker: &SpeakerProfile,
) -> CoreResult<Box<dyn ResponseGenerator>> {
    match config.generation.backend {
        BackendKind::Local => {
            let generator = LocalGenerator::from_config(config)?;
            let info = generator.probe(config.local.precision, config.local.quantization)?;
            info!(model = %info.model_id, "Generation: local backend ready");
            Ok(Box::new(generator))
        }
        BackendKind::Hosted => {
            let var = &config.hosted.api_key_env;
            let api_key = std::env::var(var)
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .ok_or_else(|| CoreError::MissingCredential(var.clone()))?;
            let generator = HostedGenerator::from_config(config, speaker, api_key)?;
            info!(model = %config.hosted.model, "Generation: hosted backend ready");
            Ok(Box::new(generator))
        }
    }
}

pub(crate) fn http_client(timeout: Duration) -> CoreResult<reqwest::blocking::Client> {
    if timeout.is_zero() {
        return Err(CoreError::Config(
            "generation timeout must be greater than zero".to_string(),
        ));
    }
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CoreError::Config(format!("could not build HTTP client: {}", e)))
}

/// First `limit` characters of an error body, for messages.
pub(crate) fn excerpt(body: &str, limit: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
