//! Local causal LM behind a text-generation-inference style HTTP server.
//!
//! The prompt is rendered with the Llama-3 Instruct chat template (system persona +
//! user turn, ending with the assistant header) and sent to `POST /generate` with
//! `return_full_text`. The server echoes the prompt, which is stripped here.

use super::{excerpt, http_client, ResponseGenerator, SamplingConfig};
use crate::config::KoeConfig;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_LOCAL_URL: &str = "http://127.0.0.1:8080";
pub const LLAMA3_MODEL_ID: &str = "meta-llama/Meta-Llama-3-8B-Instruct";
pub const ELYZA_MODEL_ID: &str = "elyza/Llama-3-ELYZA-JP-8B";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Please respond in Japanese.";
pub const ELYZA_SYSTEM_PROMPT: &str =
    "あなたは誠実で優秀な日本人のアシスタントです。特に指示が無い場合は、常に日本語で回答してください。";

const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
const END_OF_TURN: &str = "<|eot_id|>";

/// Model family defaults for the local backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalPreset {
    /// Meta-Llama-3-8B-Instruct with an English system prompt asking for Japanese answers.
    #[default]
    Llama3,
    /// ELYZA Japanese Llama-3: Japanese system prompt, cooler sampling, long answers.
    Elyza,
}

impl LocalPreset {
    pub fn model_id(&self) -> &'static str {
        match self {
            LocalPreset::Llama3 => LLAMA3_MODEL_ID,
            LocalPreset::Elyza => ELYZA_MODEL_ID,
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            LocalPreset::Llama3 => DEFAULT_SYSTEM_PROMPT,
            LocalPreset::Elyza => ELYZA_SYSTEM_PROMPT,
        }
    }

    pub fn sampling(&self) -> SamplingConfig {
        match self {
            LocalPreset::Llama3 => SamplingConfig::default(),
            LocalPreset::Elyza => SamplingConfig {
                temperature: 0.6,
                top_p: 0.9,
                max_new_tokens: 1200,
            },
        }
    }
}

/// Numeric precision the model is expected to be served in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Auto,
    #[default]
    Bfloat16,
    Float16,
    Float32,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Auto => "auto",
            Precision::Bfloat16 => "bfloat16",
            Precision::Float16 => "float16",
            Precision::Float32 => "float32",
        }
    }

    /// Whether a served dtype string (e.g. `torch.bfloat16`) satisfies this setting.
    pub fn matches(&self, served: &str) -> bool {
        match self {
            Precision::Auto => true,
            // "float16" is a substring of "bfloat16"; compare the last path segment.
            p => served.rsplit('.').next().unwrap_or(served) == p.as_str(),
        }
    }
}

/// Weight quantization the server was started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Quantization {
    #[serde(rename = "none")]
    None,
    #[default]
    #[serde(rename = "4bit")]
    FourBit,
    #[serde(rename = "8bit")]
    EightBit,
}

impl Quantization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantization::None => "none",
            Quantization::FourBit => "4bit",
            Quantization::EightBit => "8bit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Render `messages` with the Llama-3 Instruct template and open the assistant turn.
pub fn render_llama3_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::from(BEGIN_OF_TEXT);
    for m in messages {
        prompt.push_str("<|start_header_id|>");
        prompt.push_str(m.role.as_str());
        prompt.push_str("<|end_header_id|>\n\n");
        prompt.push_str(m.content.trim());
        prompt.push_str(END_OF_TURN);
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

/// Remove the echoed prompt (with or without the BOS marker) and the end-of-turn token.
pub fn strip_echoed_prompt(prompt: &str, generated: &str) -> String {
    let without_bos = prompt.strip_prefix(BEGIN_OF_TEXT).unwrap_or(prompt);
    let rest = generated
        .strip_prefix(prompt)
        .or_else(|| generated.strip_prefix(without_bos))
        .unwrap_or(generated);
    let rest = rest.trim();
    rest.strip_suffix(END_OF_TURN).unwrap_or(rest).trim().to_string()
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: GenerateParameters,
}

#[derive(Serialize)]
struct GenerateParameters {
    do_sample: bool,
    temperature: f32,
    top_p: f32,
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Deserialize)]
struct Generated {
    generated_text: String,
}

/// Servers answer with either an object or a one-element list.
#[derive(Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    One(Generated),
    Many(Vec<Generated>),
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        match self {
            GenerateResponse::One(g) => Some(g.generated_text),
            GenerateResponse::Many(list) => list.into_iter().next().map(|g| g.generated_text),
        }
    }
}

/// What `GET /info` reports about the served model.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub model_id: String,
    #[serde(default)]
    pub model_dtype: Option<String>,
}

pub struct LocalGenerator {
    base_url: String,
    model_id: String,
    system_prompt: String,
    sampling: SamplingConfig,
    client: reqwest::blocking::Client,
}

impl LocalGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model_id: impl Into<String>,
        system_prompt: impl Into<String>,
        sampling: SamplingConfig,
        timeout: Duration,
    ) -> CoreResult<Self> {
        sampling.validate()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(CoreError::Config("local.base_url is empty".to_string()));
        }
        Ok(Self {
            base_url,
            model_id: model_id.into(),
            system_prompt: system_prompt.into(),
            sampling,
            client: http_client(timeout)?,
        })
    }

    pub fn from_config(config: &KoeConfig) -> CoreResult<Self> {
        Self::new(
            &config.local.base_url,
            config.local.effective_model_id(),
            config.local.effective_system_prompt(),
            config.sampling(),
            config.generation_timeout(),
        )
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Confirm the server is up and serving a model. Failure here is fatal at startup;
    /// a different model or dtype than configured is only a warning.
    pub fn probe(&self, precision: Precision, quantization: Quantization) -> CoreResult<ServerInfo> {
        let url = format!("{}/info", self.base_url);
        let res = self.client.get(&url).send().map_err(|e| {
            CoreError::Generation(format!("local model server at {} is unreachable: {}", self.base_url, e))
        })?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().unwrap_or_default();
            return Err(CoreError::Generation(format!(
                "local model server is not ready ({}): {}",
                status,
                excerpt(&body, 200)
            )));
        }
        let info: ServerInfo = res
            .json()
            .map_err(|e| CoreError::Generation(format!("unexpected /info payload: {}", e)))?;

        if info.model_id != self.model_id {
            warn!(
                configured = %self.model_id,
                served = %info.model_id,
                "Generation: local server is serving a different model"
            );
        }
        if let Some(dtype) = &info.model_dtype {
            if !precision.matches(dtype) {
                warn!(
                    configured = precision.as_str(),
                    served = %dtype,
                    "Generation: local server precision differs from configuration"
                );
            }
        }
        info!(
            quantization = quantization.as_str(),
            "Generation: local model quantization (applied by the server)"
        );
        Ok(info)
    }

    pub fn prompt_for(&self, user_text: &str) -> String {
        render_llama3_prompt(&[
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(user_text),
        ])
    }
}

impl ResponseGenerator for LocalGenerator {
    fn name(&self) -> &'static str {
        "local"
    }

    fn try_generate(&self, user_text: &str) -> CoreResult<String> {
        let prompt = self.prompt_for(user_text);
        let body = GenerateRequest {
            inputs: &prompt,
            parameters: GenerateParameters {
                do_sample: true,
                temperature: self.sampling.temperature,
                top_p: self.sampling.top_p,
                max_new_tokens: self.sampling.max_new_tokens,
                return_full_text: true,
            },
        };

        debug!(model = %self.model_id, chars = user_text.chars().count(), "Generation: local request");
        let url = format!("{}/generate", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| CoreError::Generation(format!("local request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(CoreError::Generation(format!(
                "local server error {}: {}",
                status,
                excerpt(&body, 200)
            )));
        }

        let parsed: GenerateResponse = res
            .json()
            .map_err(|e| CoreError::Generation(format!("local response parse failed: {}", e)))?;
        let generated = parsed
            .into_text()
            .ok_or_else(|| CoreError::Generation("local server returned no text".to_string()))?;
        Ok(strip_echoed_prompt(&prompt, &generated))
    }
}
