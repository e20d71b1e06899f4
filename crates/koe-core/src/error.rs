//! Error types for configuration, generation and the conversation loop.

use koe_voice::VoiceError;
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    /// The generation backend failed (transport, HTTP status, malformed or empty payload).
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Short remedy shown to the user next to the error.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            CoreError::Voice(err) => err.hint(),
            CoreError::MissingCredential(_) => {
                Some("export the API key (or put it in .env) before starting the hosted backend")
            }
            CoreError::Generation(_) => {
                Some("check that the generation backend is running and the model name is correct")
            }
            _ => None,
        }
    }
}
