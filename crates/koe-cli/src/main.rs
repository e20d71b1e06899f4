//! `koe`: talk to an LLM and hear the answer in a VOICEVOX voice.
//!
//! Usage:
//!   koe [chat] [--speaker 1] [--backend local|hosted] [--config koe.toml]
//!   koe say "こんにちは、ずんだもんなのだ。" [--speaker 1]
//!   koe speakers
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); the conversation itself goes to stdout.

mod commands;
mod input;

use clap::{Parser, Subcommand};
use koe_core::{BackendKind, CoreError, KoeConfig};
use koe_voice::VoiceError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "koe", version, about = "LLM conversation with VOICEVOX speech output")]
struct Cli {
    /// Configuration file (default: $KOE_CONFIG, then config/koe.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// VOICEVOX speaker id (default: conversation.default_speaker)
    #[arg(long, short, global = true, value_name = "ID")]
    speaker: Option<u32>,

    /// Generation backend for `chat`
    #[arg(long, global = true, value_name = "local|hosted")]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Interactive conversation (default)
    Chat,
    /// Synthesize and play one line of text
    Say {
        /// Text to speak
        text: String,
    },
    /// List the configured speakers
    Speakers,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            if let Some(hint) = hint_for(&e) {
                eprintln!("  hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = KoeConfig::load(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.generation.backend = backend;
        config.validate()?;
    }

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => commands::chat(&config, cli.speaker),
        Command::Say { text } => commands::say(&config, cli.speaker, &text),
        Command::Speakers => commands::speakers(&config, &mut std::io::stdout().lock()),
    }
}

fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    if let Some(core) = err.downcast_ref::<CoreError>() {
        return core.hint();
    }
    err.downcast_ref::<VoiceError>().and_then(VoiceError::hint)
}
