use crate::capability::SpeechCapability;
use crate::error::VoiceError;
use crate::process::{check_input_size, run};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

/// Speech through the operating system's built-in engine.
///
/// On Windows this drives SAPI (`System.Speech`) through PowerShell; elsewhere
/// it runs `espeak-ng`, which plays directly to the default audio device.
#[derive(Debug, Clone, Default)]
pub struct SystemSpeech {
    binary: Option<PathBuf>,
}

impl SystemSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the engine binary (`espeak-ng` or `powershell`).
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: Some(binary.into()),
        }
    }

    fn command(&self, text: &str, voice: Option<&str>, volume: Option<f32>) -> Command {
        if cfg!(windows) {
            let mut command = Command::new(
                self.binary
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("powershell")),
            );
            command
                .arg("-NoProfile")
                .arg("-NonInteractive")
                .arg("-Command")
                .arg(sapi_script(text, voice, volume));
            command
        } else {
            let mut command = Command::new(
                self.binary
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("espeak-ng")),
            );
            command.args(espeak_args(text, voice, volume));
            command
        }
    }
}

/// Maps a 0..1 volume onto an integer percentage.
fn volume_percent(volume: f32) -> u32 {
    (volume.clamp(0.0, 1.0) * 100.0).round() as u32
}

/// Quotes a value as a single-quoted PowerShell literal.
fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Builds the PowerShell SAPI script. Voice selection tolerates unknown names.
pub(crate) fn sapi_script(text: &str, voice: Option<&str>, volume: Option<f32>) -> String {
    let mut script = String::from(
        "Add-Type -AssemblyName System.Speech; \
         $s = New-Object System.Speech.Synthesis.SpeechSynthesizer; ",
    );
    if let Some(volume) = volume {
        script.push_str(&format!("$s.Volume = {}; ", volume_percent(volume)));
    }
    if let Some(voice) = voice.map(str::trim).filter(|v| !v.is_empty()) {
        script.push_str(&format!(
            "try {{ $s.SelectVoice((Get-Culture).TextInfo.ToTitleCase({})) }} catch {{ }}; ",
            ps_quote(voice)
        ));
    }
    script.push_str(&format!("$s.Speak({})", ps_quote(text)));
    script
}

/// Arguments for `espeak-ng`. Amplitude 100 is espeak's normal level.
pub(crate) fn espeak_args(text: &str, voice: Option<&str>, volume: Option<f32>) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(voice) = voice.map(str::trim).filter(|v| !v.is_empty()) {
        args.push("-v".to_string());
        args.push(voice.to_string());
    }
    if let Some(volume) = volume {
        args.push("-a".to_string());
        args.push(volume_percent(volume).to_string());
    }
    // Keep text that starts with '-' from being parsed as an option.
    args.push("--".to_string());
    args.push(text.to_string());
    args
}

#[async_trait]
impl SpeechCapability for SystemSpeech {
    async fn speak(
        &self,
        text: &str,
        voice: Option<&str>,
        volume: Option<f32>,
    ) -> Result<(), VoiceError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        check_input_size(text)?;

        tracing::debug!(voice, volume, "speaking through system engine");
        run(self.command(text, voice, volume), "system speech", None, VoiceError::Tts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn espeak_args_map_voice_and_volume() {
        let args = espeak_args("Door open", Some("en-us"), Some(0.42));
        assert_eq!(args, vec!["-v", "en-us", "-a", "42", "--", "Door open"]);

        let args = espeak_args("-5 degrees outside", None, None);
        assert_eq!(args, vec!["--", "-5 degrees outside"]);
    }

    #[test]
    fn sapi_script_escapes_quotes() {
        let script = sapi_script("It's \"late\"", Some("zira"), Some(1.0));
        assert!(script.contains("$s.Volume = 100;"));
        assert!(script.contains("ToTitleCase('zira')"));
        assert!(script.ends_with("$s.Speak('It''s \"late\"')"));
    }

    #[test]
    fn volume_is_clamped() {
        assert_eq!(volume_percent(0.0), 0);
        assert_eq!(volume_percent(2.0), 100);
        assert_eq!(volume_percent(0.25), 25);
    }

    #[tokio::test]
    async fn blank_text_does_not_spawn() {
        let speech = SystemSpeech::with_binary("/nonexistent/espeak-ng");
        assert!(speech.speak(" \n ", None, None).await.is_ok());
    }

    #[tokio::test]
    async fn missing_engine_is_an_error() {
        let speech = SystemSpeech::with_binary("/nonexistent/espeak-ng");
        let result = speech.speak("hello", None, None).await;
        assert!(matches!(result, Err(VoiceError::Tts(_))));
    }
}
