//! Subcommand bodies. Everything fatal happens before the first prompt.

use crate::input::TerminalInput;
use anyhow::Context;
use koe_core::{create_generator, Conversation, KoeConfig, StopReason};
use koe_voice::{SpeechSynthesizer, VoicevoxClient};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Interactive loop: prompt, generate, speak.
pub fn chat(config: &KoeConfig, speaker_id: Option<u32>) -> anyhow::Result<()> {
    let speaker = config.speaker(speaker_id)?;
    let synthesizer = config.voicevox_client()?;
    probe_engine(&synthesizer);
    let sink = config.audio_sink()?;
    let generator = create_generator(config, speaker)?;

    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupt);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        eprintln!("\nInterrupted; stopping after the current step.");
    })
    .context("failed to install the Ctrl-C handler")?;

    let mut input = TerminalInput::new()?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(
        out,
        "{} backend ready, speaking as {} (id {}). Type '{}' to quit.\n",
        config.generation.backend,
        speaker.display_name,
        speaker.id,
        config.conversation.exit_keyword
    )?;

    let summary = Conversation::new(generator.as_ref(), &synthesizer, sink.as_ref(), speaker)
        .with_exit_keyword(&config.conversation.exit_keyword)
        .with_prompt(&config.conversation.prompt)
        .with_interrupt_flag(interrupt)
        .run(&mut input, &mut out)?;

    if summary.stop_reason == StopReason::Interrupted {
        writeln!(out)?;
    }
    writeln!(out, "Goodbye.")?;
    Ok(())
}

/// One-shot synthesis and playback of `text`.
pub fn say(config: &KoeConfig, speaker_id: Option<u32>, text: &str) -> anyhow::Result<()> {
    let speaker = config.speaker(speaker_id)?;
    let synthesizer = config.voicevox_client()?;
    let sink = config.audio_sink()?;

    let audio = synthesizer.synthesize(text, speaker)?;
    info!(bytes = audio.len(), speaker = speaker.id, "Say: synthesized");
    sink.play(audio)?;
    Ok(())
}

/// Print the configured speaker table.
pub fn speakers(config: &KoeConfig, out: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(out, "{:>4}  {:<16} {:>6} {:>6} {:>6}", "id", "name", "speed", "pitch", "pause")?;
    for p in config.speakers.iter() {
        let marker = if p.id == config.conversation.default_speaker {
            " *"
        } else {
            ""
        };
        writeln!(
            out,
            "{:>4}  {:<16} {:>6} {:>6} {:>6}{}",
            p.id,
            p.display_name,
            fmt_override(p.speed_scale),
            fmt_override(p.pitch_scale),
            fmt_override(p.pause_length),
            marker
        )?;
    }
    Ok(())
}

fn fmt_override(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Non-fatal: the engine may come up after the conversation starts.
fn probe_engine(client: &VoicevoxClient) {
    match client.version() {
        Ok(version) => info!(url = client.base_url(), %version, "VOICEVOX engine reachable"),
        Err(e) => warn!(url = client.base_url(), "VOICEVOX engine not reachable yet: {}", e),
    }
}
