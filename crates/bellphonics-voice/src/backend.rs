use crate::capability::SpeechCapability;
use crate::config::TtsConfig;
use crate::error::VoiceError;
use crate::mock::MockSpeech;
use crate::piper::PiperSpeech;
use crate::system::SystemSpeech;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which speech engine the relay drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Mock,
    /// OS-native speech (SAPI on Windows, espeak-ng elsewhere).
    #[serde(alias = "sapi")]
    System,
    /// Piper neural voices.
    Piper,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::System => "system",
            Self::Piper => "piper",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown TTS backend: {0}")]
pub struct ParseBackendKindError(pub String);

impl FromStr for BackendKind {
    type Err = ParseBackendKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            // "sapi" is accepted for configurations written for Windows hosts.
            "system" | "sapi" => Ok(Self::System),
            "piper" => Ok(Self::Piper),
            other => Err(ParseBackendKindError(other.to_string())),
        }
    }
}

/// The speech engine selected at startup.
#[derive(Debug)]
pub enum SpeechBackend {
    Mock(MockSpeech),
    System(SystemSpeech),
    Piper(PiperSpeech),
}

impl SpeechBackend {
    /// Builds the backend named by `config.backend`.
    ///
    /// # Errors
    ///
    /// Returns `VoiceError::Config` when the Piper voices directory is missing.
    pub fn from_config(config: &TtsConfig) -> Result<Self, VoiceError> {
        let backend = match config.backend {
            BackendKind::Mock => Self::Mock(MockSpeech),
            BackendKind::System => Self::System(match &config.system_binary {
                Some(binary) => SystemSpeech::with_binary(binary),
                None => SystemSpeech::new(),
            }),
            BackendKind::Piper => {
                let piper = PiperSpeech::new(
                    &config.voices_dir,
                    config.default_voice.clone(),
                    &config.piper_binary,
                )?;
                Self::Piper(match &config.player_binary {
                    Some(player) => piper.with_player(player),
                    None => piper,
                })
            }
        };
        tracing::info!(backend = %backend.kind(), "speech backend selected");
        Ok(backend)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Mock(_) => BackendKind::Mock,
            Self::System(_) => BackendKind::System,
            Self::Piper(_) => BackendKind::Piper,
        }
    }
}

#[async_trait]
impl SpeechCapability for SpeechBackend {
    async fn speak(
        &self,
        text: &str,
        voice: Option<&str>,
        volume: Option<f32>,
    ) -> Result<(), VoiceError> {
        match self {
            Self::Mock(inner) => inner.speak(text, voice, volume).await,
            Self::System(inner) => inner.speak(text, voice, volume).await,
            Self::Piper(inner) => inner.speak(text, voice, volume).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_names() {
        assert_eq!("mock".parse::<BackendKind>(), Ok(BackendKind::Mock));
        assert_eq!(" Piper ".parse::<BackendKind>(), Ok(BackendKind::Piper));
        assert_eq!("SAPI".parse::<BackendKind>(), Ok(BackendKind::System));
        assert_eq!(
            "festival".parse::<BackendKind>(),
            Err(ParseBackendKindError("festival".to_string()))
        );
    }

    #[test]
    fn builds_selected_backend() {
        let config = TtsConfig::default();
        assert_eq!(SpeechBackend::from_config(&config).unwrap().kind(), BackendKind::Mock);

        let config = TtsConfig {
            backend: BackendKind::System,
            ..TtsConfig::default()
        };
        assert_eq!(SpeechBackend::from_config(&config).unwrap().kind(), BackendKind::System);
    }

    #[test]
    fn piper_without_voices_dir_fails_at_construction() {
        let config = TtsConfig {
            backend: BackendKind::Piper,
            voices_dir: "/nonexistent/voices".into(),
            ..TtsConfig::default()
        };
        assert!(matches!(
            SpeechBackend::from_config(&config),
            Err(VoiceError::Config(_))
        ));
    }

    #[test]
    fn piper_with_voices_dir_builds() {
        let dir = tempfile::tempdir().unwrap();
        let config = TtsConfig {
            backend: BackendKind::Piper,
            voices_dir: dir.path().to_path_buf(),
            ..TtsConfig::default()
        };
        assert_eq!(SpeechBackend::from_config(&config).unwrap().kind(), BackendKind::Piper);
    }
}
