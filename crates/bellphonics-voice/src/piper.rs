use crate::capability::SpeechCapability;
use crate::error::VoiceError;
use crate::process::{check_input_size, run};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Neural speech through Piper voice models.
///
/// Each utterance is synthesized to a temporary WAV file which is then played
/// with a platform audio player. Volume is not supported by this backend and
/// is ignored.
#[derive(Debug, Clone)]
pub struct PiperSpeech {
    voices_dir: PathBuf,
    default_voice: String,
    piper_binary: PathBuf,
    player_binary: Option<PathBuf>,
}

impl PiperSpeech {
    /// Creates the backend, checking that the voices directory exists.
    ///
    /// # Errors
    ///
    /// Returns `VoiceError::Config` if `voices_dir` is not a directory.
    pub fn new(
        voices_dir: impl AsRef<Path>,
        default_voice: impl Into<String>,
        piper_binary: impl AsRef<Path>,
    ) -> Result<Self, VoiceError> {
        let voices_dir = voices_dir.as_ref().to_path_buf();
        if !voices_dir.is_dir() {
            return Err(VoiceError::Config(format!(
                "Piper voices directory not found: {:?}",
                voices_dir
            )));
        }
        let default_voice = default_voice.into();
        tracing::info!(voices_dir = ?voices_dir, default_voice = %default_voice, "piper backend initialized");

        Ok(Self {
            voices_dir,
            default_voice,
            piper_binary: piper_binary.as_ref().to_path_buf(),
            player_binary: None,
        })
    }

    pub fn with_player(mut self, player: impl Into<PathBuf>) -> Self {
        self.player_binary = Some(player.into());
        self
    }

    /// Finds the model for `voice`, falling back to the default voice.
    ///
    /// Voice names come from clients, so anything that is not a plain file
    /// stem is treated as unknown.
    pub fn resolve_model(&self, voice: Option<&str>) -> Result<PathBuf, VoiceError> {
        let requested = voice.map(str::trim).filter(|v| !v.is_empty());
        if let Some(name) = requested {
            if let Some(path) = self.model_path(name).filter(|p| p.is_file()) {
                return Ok(path);
            }
            tracing::warn!(voice = name, "voice not found, falling back to default");
        }

        self.model_path(&self.default_voice)
            .filter(|p| p.is_file())
            .ok_or_else(|| {
                VoiceError::Tts(format!(
                    "Default voice not found: {:?}",
                    self.voices_dir.join(format!("{}.onnx", self.default_voice))
                ))
            })
    }

    fn model_path(&self, name: &str) -> Option<PathBuf> {
        let plain = !name.contains(['/', '\\']) && name != "." && name != "..";
        plain.then(|| self.voices_dir.join(format!("{}.onnx", name)))
    }

    fn synth_command(&self, model: &Path, wav: &Path) -> Command {
        let mut command = Command::new(&self.piper_binary);
        command
            .arg("--model")
            .arg(model)
            .arg("--output_file")
            .arg(wav);
        command
    }

    fn player_command(&self, wav: &Path) -> Command {
        if let Some(player) = &self.player_binary {
            let mut command = Command::new(player);
            command.arg(wav);
            return command;
        }

        if cfg!(windows) {
            let mut command = Command::new("powershell");
            let path = wav.to_string_lossy().replace('\'', "''");
            command
                .arg("-NoProfile")
                .arg("-NonInteractive")
                .arg("-Command")
                .arg(format!("(New-Object Media.SoundPlayer '{}').PlaySync()", path));
            command
        } else if cfg!(target_os = "macos") {
            let mut command = Command::new("afplay");
            command.arg(wav);
            command
        } else {
            let mut command = Command::new("aplay");
            command.arg("-q").arg(wav);
            command
        }
    }
}

#[async_trait]
impl SpeechCapability for PiperSpeech {
    async fn speak(
        &self,
        text: &str,
        voice: Option<&str>,
        _volume: Option<f32>,
    ) -> Result<(), VoiceError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        check_input_size(text)?;

        let model = self.resolve_model(voice)?;

        // Removed when `wav` is dropped, whatever the outcome.
        let wav = tempfile::Builder::new()
            .prefix("bellphonics-")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| VoiceError::Tts(format!("Failed to create temporary WAV: {}", e)))?;

        run(
            self.synth_command(&model, wav.path()),
            "piper",
            Some(text.to_string()),
            VoiceError::Tts,
        )
        .await?;
        tracing::info!(model = ?model, chars = text.chars().count(), "synthesized utterance");

        run(self.player_command(wav.path()), "audio player", None, VoiceError::Playback).await
    }
}
