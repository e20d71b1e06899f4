//! Koe configuration: built-in defaults, optional TOML file, `KOE_*` environment.
//!
//! Precedence (lowest to highest): `Default` impls, the TOML file (`--config`
//! path, else `KOE_CONFIG`, else `config/koe.toml` when it exists), then
//! environment variables such as `KOE_VOICEVOX__BASE_URL` or
//! `KOE_GENERATION__BACKEND=local`.
//!
//! | Key | Default |
//! |-----|---------|
//! | voicevox.base_url | http://127.0.0.1:50021 |
//! | voicevox.query_timeout_secs / synthesis_timeout_secs | 10 / 30 |
//! | generation.backend | hosted |
//! | generation.temperature / top_p / max_new_tokens | preset or 0.7 / 0.9 / 512 |
//! | generation.timeout_secs | 60 |
//! | local.base_url / preset | http://127.0.0.1:8080 / llama3 |
//! | hosted.model / api_key_env | gemini-2.0-flash / GEMINI_API_KEY |
//! | playback.mode / player.program | command / aplay |
//! | conversation.exit_keyword / default_speaker | exit / 1 |

use crate::conversation::{DEFAULT_EXIT_KEYWORD, DEFAULT_PROMPT};
use crate::error::{CoreError, CoreResult};
use crate::generation::local::{LocalPreset, Precision, Quantization, DEFAULT_LOCAL_URL};
use crate::generation::hosted::{
    DEFAULT_API_KEY_ENV, DEFAULT_GEMINI_MODEL, DEFAULT_PERSONA_AGE, GEMINI_API_BASE,
};
use crate::generation::{BackendKind, SamplingConfig, DEFAULT_GENERATION_TIMEOUT};
use koe_voice::{
    create_sink, AudioSink, PlaybackMode, PlayerCommand, SpeakerProfile, SpeakerTable,
    VoicevoxClient, DEFAULT_QUERY_TIMEOUT, DEFAULT_SYNTHESIS_TIMEOUT, DEFAULT_VOICEVOX_URL,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Used when neither `--config` nor `KOE_CONFIG` names a file.
pub const DEFAULT_CONFIG_PATH: &str = "config/koe.toml";
/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "KOE_CONFIG";
const ENV_PREFIX: &str = "KOE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KoeConfig {
    pub voicevox: VoicevoxSection,
    pub generation: GenerationSection,
    pub local: LocalSection,
    pub hosted: HostedSection,
    pub playback: PlaybackSection,
    pub conversation: ConversationSection,
    /// Speaker lookup table (`[[speakers]]`); replaces the built-in table when present.
    pub speakers: SpeakerTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicevoxSection {
    pub base_url: String,
    pub query_timeout_secs: u64,
    pub synthesis_timeout_secs: u64,
}

impl Default for VoicevoxSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_VOICEVOX_URL.to_string(),
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT.as_secs(),
            synthesis_timeout_secs: DEFAULT_SYNTHESIS_TIMEOUT.as_secs(),
        }
    }
}

/// Backend choice and sampling. Unset sampling values fall back to the
/// local preset's values (local backend) or to [`SamplingConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSection {
    pub backend: BackendKind,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_new_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            temperature: None,
            top_p: None,
            max_new_tokens: None,
            timeout_secs: DEFAULT_GENERATION_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSection {
    pub base_url: String,
    pub preset: LocalPreset,
    /// Overrides the preset's model id.
    pub model_id: Option<String>,
    /// Overrides the preset's system prompt.
    pub system_prompt: Option<String>,
    pub precision: Precision,
    pub quantization: Quantization,
}

impl Default for LocalSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LOCAL_URL.to_string(),
            preset: LocalPreset::default(),
            model_id: None,
            system_prompt: None,
            precision: Precision::default(),
            quantization: Quantization::default(),
        }
    }
}

impl LocalSection {
    pub fn effective_model_id(&self) -> &str {
        self.model_id
            .as_deref()
            .unwrap_or_else(|| self.preset.model_id())
    }

    pub fn effective_system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or_else(|| self.preset.system_prompt())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostedSection {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key. The key itself never lives in config.
    pub api_key_env: String,
    pub persona_age: u32,
}

impl Default for HostedSection {
    fn default() -> Self {
        Self {
            base_url: GEMINI_API_BASE.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            persona_age: DEFAULT_PERSONA_AGE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSection {
    pub mode: PlaybackMode,
    pub player: PlayerCommand,
    /// Directory for transient `koe-*.wav` files; system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationSection {
    pub exit_keyword: String,
    pub prompt: String,
    pub default_speaker: u32,
}

impl Default for ConversationSection {
    fn default() -> Self {
        Self {
            exit_keyword: DEFAULT_EXIT_KEYWORD.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            default_speaker: 1,
        }
    }
}

impl KoeConfig {
    /// Load from the explicit `path`, else `KOE_CONFIG`, else `config/koe.toml`, then the environment.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        Self::load_with_env(path.as_deref(), environment())
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> CoreResult<Self> {
        let builder = config::Config::builder();
        let builder = match path {
            Some(p) if !p.exists() => {
                return Err(CoreError::Config(format!(
                    "config file {} does not exist",
                    p.display()
                )))
            }
            Some(p) => builder.add_source(config::File::from(p)),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    builder.add_source(config::File::from(default))
                } else {
                    builder
                }
            }
        };

        let built = builder.add_source(env).build()?;
        let cfg: KoeConfig = built.try_deserialize()?;
        cfg.validate()?;
        tracing::debug!(
            backend = %cfg.generation.backend,
            voicevox = %cfg.voicevox.base_url,
            speakers = cfg.speakers.len(),
            "Config: loaded"
        );
        Ok(cfg)
    }

    /// Reject values that would only fail later, mid-conversation.
    pub fn validate(&self) -> CoreResult<()> {
        if self.voicevox.base_url.trim().is_empty() {
            return Err(CoreError::Config("voicevox.base_url is empty".to_string()));
        }
        if self.voicevox.query_timeout_secs == 0 || self.voicevox.synthesis_timeout_secs == 0 {
            return Err(CoreError::Config(
                "voicevox timeouts must be greater than zero".to_string(),
            ));
        }
        if self.voicevox.query_timeout_secs > self.voicevox.synthesis_timeout_secs {
            return Err(CoreError::Config(
                "voicevox.query_timeout_secs must not exceed synthesis_timeout_secs".to_string(),
            ));
        }
        if self.generation.timeout_secs == 0 {
            return Err(CoreError::Config(
                "generation.timeout_secs must be greater than zero".to_string(),
            ));
        }
        self.sampling().validate()?;
        if self.hosted.api_key_env.trim().is_empty() {
            return Err(CoreError::Config("hosted.api_key_env is empty".to_string()));
        }
        if self.conversation.exit_keyword.trim().is_empty() {
            return Err(CoreError::Config(
                "conversation.exit_keyword is empty".to_string(),
            ));
        }
        self.speakers.validate()?;
        Ok(())
    }

    /// Sampling for the configured backend: explicit values win over preset defaults.
    pub fn sampling(&self) -> SamplingConfig {
        let base = match self.generation.backend {
            BackendKind::Local => self.local.preset.sampling(),
            BackendKind::Hosted => SamplingConfig::default(),
        };
        SamplingConfig {
            temperature: self.generation.temperature.unwrap_or(base.temperature),
            top_p: self.generation.top_p.unwrap_or(base.top_p),
            max_new_tokens: self.generation.max_new_tokens.unwrap_or(base.max_new_tokens),
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs)
    }

    /// Look up `id`, or the configured default speaker when `None`.
    pub fn speaker(&self, id: Option<u32>) -> CoreResult<&SpeakerProfile> {
        let id = id.unwrap_or(self.conversation.default_speaker);
        Ok(self.speakers.get(id)?)
    }

    pub fn voicevox_client(&self) -> CoreResult<VoicevoxClient> {
        Ok(VoicevoxClient::new(
            &self.voicevox.base_url,
            Duration::from_secs(self.voicevox.query_timeout_secs),
            Duration::from_secs(self.voicevox.synthesis_timeout_secs),
        )?)
    }

    pub fn audio_sink(&self) -> CoreResult<Box<dyn AudioSink>> {
        Ok(create_sink(
            self.playback.mode,
            self.playback.player.clone(),
            self.playback.temp_dir.clone(),
        )?)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_the_documented_constants() {
        let cfg = KoeConfig::default();
        assert_eq!(cfg.voicevox.base_url, "http://127.0.0.1:50021");
        assert_eq!(cfg.voicevox.query_timeout_secs, 10);
        assert_eq!(cfg.voicevox.synthesis_timeout_secs, 30);
        assert_eq!(cfg.generation.backend, BackendKind::Hosted);
        assert_eq!(cfg.generation.timeout_secs, 60);
        assert_eq!(cfg.hosted.model, "gemini-2.0-flash");
        assert_eq!(cfg.hosted.api_key_env, "GEMINI_API_KEY");
        assert_eq!(cfg.conversation.exit_keyword, "exit");
        assert_eq!(cfg.conversation.exit_keyword, DEFAULT_EXIT_KEYWORD);
        assert_eq!(cfg.conversation.prompt, DEFAULT_PROMPT);
        assert_eq!(cfg.conversation.default_speaker, 1);
        assert_eq!(cfg.playback.mode, PlaybackMode::Command);
        assert_eq!(cfg.playback.player.program, "aplay");

        let s = cfg.sampling();
        assert_eq!(s, SamplingConfig::default());
        assert_eq!((s.temperature, s.top_p, s.max_new_tokens), (0.7, 0.9, 512));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn file_values_are_read() {
        let file = toml_file(
            r#"
            [voicevox]
            base_url = "http://voicevox:50021"

            [generation]
            backend = "local"
            temperature = 0.5

            [local]
            preset = "elyza"
            quantization = "8bit"

            [[speakers]]
            id = 8
            display_name = "春日部つむぎ"
            speed_scale = 1.1
            "#,
        );

        let cfg = KoeConfig::load_with_env(Some(file.path()), env(&[])).unwrap();

        assert_eq!(cfg.voicevox.base_url, "http://voicevox:50021");
        assert_eq!(cfg.generation.backend, BackendKind::Local);
        assert_eq!(cfg.local.preset, LocalPreset::Elyza);
        assert_eq!(cfg.local.quantization, Quantization::EightBit);
        assert_eq!(cfg.speakers.len(), 1);
        assert_eq!(cfg.speaker(Some(8)).unwrap().speed_scale, Some(1.1));
        // Unset values keep their defaults.
        assert_eq!(cfg.voicevox.query_timeout_secs, 10);
    }

    #[test]
    fn environment_overrides_file() {
        let file = toml_file("[voicevox]\nbase_url = \"http://from-file:50021\"\n");

        let cfg = KoeConfig::load_with_env(
            Some(file.path()),
            env(&[
                ("KOE_VOICEVOX__BASE_URL", "http://from-env:50021"),
                ("KOE_CONVERSATION__DEFAULT_SPEAKER", "2"),
            ]),
        )
        .unwrap();

        assert_eq!(cfg.voicevox.base_url, "http://from-env:50021");
        assert_eq!(cfg.conversation.default_speaker, 2);
        assert_eq!(cfg.speaker(None).unwrap().display_name, "春日部つむぎ");
    }

    #[test]
    fn elyza_preset_supplies_sampling_unless_overridden() {
        let mut cfg = KoeConfig::default();
        cfg.generation.backend = BackendKind::Local;
        cfg.local.preset = LocalPreset::Elyza;
        let s = cfg.sampling();
        assert_eq!((s.temperature, s.max_new_tokens), (0.6, 1200));

        cfg.generation.max_new_tokens = Some(64);
        assert_eq!(cfg.sampling().max_new_tokens, 64);
        assert_eq!(cfg.sampling().temperature, 0.6);
    }

    #[test]
    fn invalid_sampling_is_rejected() {
        let mut cfg = KoeConfig::default();
        cfg.generation.temperature = Some(0.0);
        assert!(matches!(cfg.validate(), Err(CoreError::Config(_))));

        let mut cfg = KoeConfig::default();
        cfg.generation.top_p = Some(1.5);
        assert!(cfg.validate().is_err());

        let mut cfg = KoeConfig::default();
        cfg.generation.max_new_tokens = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut cfg = KoeConfig::default();
        cfg.voicevox.query_timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = KoeConfig::default();
        cfg.generation.timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let result = KoeConfig::load_with_env(Some(&missing), env(&[]));
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn unknown_default_speaker_is_an_error_at_lookup() {
        let mut cfg = KoeConfig::default();
        cfg.conversation.default_speaker = 99;
        assert!(matches!(
            cfg.speaker(None),
            Err(CoreError::Voice(koe_voice::VoiceError::UnknownSpeaker(99)))
        ));
    }
}
