//! **Playback**: hand a synthesized buffer to something that makes sound.
//!
//! Two interchangeable sinks behind [`AudioSink`]:
//! - [`CommandSink`]: writes a transient `koe-*.wav` and runs an external player
//!   (`aplay` by default) synchronously. The file is removed on every exit path.
//! - `RodioSink` (feature `native-audio`): decodes in memory and plays on the
//!   default output device.
//!
//! Every failure is reported as [`VoiceError::PlaybackUnavailable`].

use crate::audio::AudioBuffer;
use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Something that plays a WAV buffer to completion.
pub trait AudioSink: Send + Sync {
    /// Block until `buffer` has been played. Takes ownership of the audio.
    fn play(&self, buffer: AudioBuffer) -> VoiceResult<()>;
}

/// Which sink the application should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// External player process on a transient file.
    #[default]
    Command,
    /// In-process decoding and playback (requires `native-audio`).
    Library,
}

/// External player invocation. The transient file path is appended as the last argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl PlayerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// ALSA's command-line player.
    pub fn aplay() -> Self {
        Self::new("aplay", Vec::new())
    }
}

impl Default for PlayerCommand {
    fn default() -> Self {
        Self::aplay()
    }
}

/// Plays audio by running an external player on a uniquely named temporary `.wav`.
#[derive(Debug, Clone)]
pub struct CommandSink {
    player: PlayerCommand,
    temp_dir: Option<PathBuf>,
}

impl CommandSink {
    pub fn new(player: PlayerCommand) -> Self {
        Self {
            player,
            temp_dir: None,
        }
    }

    /// Create transient files in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn player(&self) -> &PlayerCommand {
        &self.player
    }

    fn persist(&self, buffer: &AudioBuffer) -> std::io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("koe-").suffix(".wav");
        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(buffer.as_bytes())?;
        file.flush()?;
        Ok(file)
    }

    fn run_player(&self, path: &Path) -> VoiceResult<()> {
        let program = &self.player.program;
        debug!(player = %program, path = %path.display(), "Playback: starting player");
        let status = Command::new(program)
            .args(&self.player.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => Ok(()),
            Ok(s) => Err(VoiceError::PlaybackUnavailable(format!(
                "'{}' exited with {}",
                program, s
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                VoiceError::PlaybackUnavailable(format!("player '{}' not found", program)),
            ),
            Err(e) => Err(VoiceError::PlaybackUnavailable(format!(
                "failed to start '{}': {}",
                program, e
            ))),
        }
    }
}

impl Default for CommandSink {
    fn default() -> Self {
        Self::new(PlayerCommand::aplay())
    }
}

impl AudioSink for CommandSink {
    fn play(&self, buffer: AudioBuffer) -> VoiceResult<()> {
        if buffer.is_empty() {
            return Err(VoiceError::PlaybackUnavailable(
                "refusing to play an empty buffer".to_string(),
            ));
        }
        let file = self.persist(&buffer).map_err(|e| {
            VoiceError::PlaybackUnavailable(format!("could not write transient audio file: {}", e))
        })?;
        drop(buffer);

        // `file` is removed when it goes out of scope, whatever the player did.
        let result = self.run_player(file.path());
        let path = file.path().to_path_buf();
        if let Err(e) = file.close() {
            warn!(path = %path.display(), "Playback: could not remove transient file: {}", e);
        }
        if result.is_ok() {
            info!("Playback: finished");
        }
        result
    }
}

#[cfg(feature = "native-audio")]
mod native {
    use super::*;
    use std::io::Cursor;

    /// Plays audio in-process through rodio. Opens the output device per utterance,
    /// so the sink itself holds no device handles and stays `Send + Sync`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct RodioSink;

    impl AudioSink for RodioSink {
        fn play(&self, buffer: AudioBuffer) -> VoiceResult<()> {
            if buffer.is_empty() {
                return Err(VoiceError::PlaybackUnavailable(
                    "refusing to play an empty buffer".to_string(),
                ));
            }
            let (_stream, stream_handle) = rodio::OutputStream::try_default()
                .map_err(|e| VoiceError::PlaybackUnavailable(e.to_string()))?;
            let sink = rodio::Sink::try_new(&stream_handle)
                .map_err(|e| VoiceError::PlaybackUnavailable(e.to_string()))?;
            let source = rodio::Decoder::new(Cursor::new(buffer.into_bytes()))
                .map_err(|e| VoiceError::PlaybackUnavailable(format!("Decode failed: {}", e)))?;
            sink.append(source);
            sink.sleep_until_end();
            info!("Playback: finished (rodio)");
            Ok(())
        }
    }
}

#[cfg(feature = "native-audio")]
pub use native::RodioSink;

/// Build the sink selected by `mode`.
pub fn create_sink(
    mode: PlaybackMode,
    player: PlayerCommand,
    temp_dir: Option<PathBuf>,
) -> VoiceResult<Box<dyn AudioSink>> {
    match mode {
        PlaybackMode::Command => {
            let mut sink = CommandSink::new(player);
            if let Some(dir) = temp_dir {
                sink = sink.with_temp_dir(dir);
            }
            Ok(Box::new(sink))
        }
        #[cfg(feature = "native-audio")]
        PlaybackMode::Library => Ok(Box::new(RodioSink)),
        #[cfg(not(feature = "native-audio"))]
        PlaybackMode::Library => Err(VoiceError::Config(
            "library playback needs koe-voice built with the `native-audio` feature".to_string(),
        )),
    }
}
