//! Gemini backend: one persona instruction per turn, `generateContent` over HTTPS.

use super::{excerpt, http_client, ResponseGenerator, SamplingConfig};
use crate::config::KoeConfig;
use crate::error::{CoreError, CoreResult};
use koe_voice::SpeakerProfile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const DEFAULT_PERSONA_AGE: u32 = 12;

/// Who the assistant plays: the selected speaker, as a friendly and polite companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub name: String,
    pub age: u32,
}

impl Persona {
    pub fn new(name: impl Into<String>, age: u32) -> Self {
        Self {
            name: name.into(),
            age,
        }
    }

    pub fn for_speaker(speaker: &SpeakerProfile, age: u32) -> Self {
        Self::new(speaker.display_name.clone(), age)
    }

    /// Full instruction for one turn: persona, conversation rules, then the user line.
    pub fn build_prompt(&self, user_text: &str) -> String {
        format!(
            "あなたは、ユーザーにとって「親しみやすいけど、とても丁寧な友人」です。名前は{name}です。年齢は{age}歳です\n\
             以下のルールを守って、優しく心地よい会話をしてください。\n\n\
             【ルール】\n\
             1. **口調:** 丁寧な言葉遣いをしてください。ただし、事務的にならないように、柔らかく、温かい雰囲気で話すことを心がけてください。「〜じゃん」のような砕けすぎた言葉は使いません。\n\
             2. **役割:** ユーザーの話に優しく耳を傾け、肯定的に相槌を打つような、聞き上手なパートナーとして振る舞ってください。\n\
             3. **回答の長さ:** 回答は常に短く、2〜3文程度にまとめてください。\n\
             4. **形式:** 箇条書きや番号リストは絶対に使わないでください。\n\n\
             ユーザー: {user}\n\
             アシスタント:",
            name = self.name,
            age = self.age,
            user = user_text,
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> CoreResult<String> {
        let Some(candidate) = self.candidates.into_iter().next() else {
            let reason = self
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(CoreError::Generation(format!(
                "Gemini returned no answer ({})",
                reason
            )));
        };
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(CoreError::Generation(format!(
                "Gemini candidate has no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(text.trim().to_string())
    }
}

pub struct HostedGenerator {
    base_url: String,
    model: String,
    api_key: String,
    persona: Persona,
    sampling: SamplingConfig,
    client: reqwest::blocking::Client,
}

impl fmt::Debug for HostedGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostedGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("persona", &self.persona)
            .field("sampling", &self.sampling)
            .finish()
    }
}

impl HostedGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        persona: Persona,
        sampling: SamplingConfig,
        timeout: Duration,
    ) -> CoreResult<Self> {
        sampling.validate()?;
        let model = model.into();
        if model.trim().is_empty() {
            return Err(CoreError::Config("hosted.model is empty".to_string()));
        }
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
            api_key: api_key.into(),
            persona,
            sampling,
            client: http_client(timeout)?,
        })
    }

    pub fn from_config(
        config: &KoeConfig,
        speaker: &SpeakerProfile,
        api_key: String,
    ) -> CoreResult<Self> {
        Self::new(
            &config.hosted.base_url,
            &config.hosted.model,
            api_key,
            Persona::for_speaker(speaker, config.hosted.persona_age),
            config.sampling(),
            config.generation_timeout(),
        )
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }
}

impl ResponseGenerator for HostedGenerator {
    fn name(&self) -> &'static str {
        "hosted"
    }

    fn try_generate(&self, user_text: &str) -> CoreResult<String> {
        let body = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart {
                    text: self.persona.build_prompt(user_text),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.sampling.temperature,
                top_p: self.sampling.top_p,
                max_output_tokens: self.sampling.max_new_tokens,
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        debug!(model = %self.model, "Generation: Gemini request");
        let res = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| CoreError::Generation(format!("Gemini request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(CoreError::Generation(format!(
                "Gemini API error {}: {}",
                status,
                excerpt(&body, 200)
            )));
        }

        let parsed: GenerateContentResponse = res
            .json()
            .map_err(|e| CoreError::Generation(format!("Gemini response parse failed: {}", e)))?;
        parsed.into_text()
    }
}
