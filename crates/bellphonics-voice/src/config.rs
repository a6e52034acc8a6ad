use crate::backend::BackendKind;
use serde::Deserialize;
use std::path::PathBuf;

fn default_voices_dir() -> PathBuf {
    PathBuf::from("voices")
}

fn default_voice() -> String {
    "en_US-lessac-medium".to_string()
}

fn default_piper_binary() -> PathBuf {
    PathBuf::from("piper")
}

/// Speech backend selection and engine locations.
#[derive(Debug, Clone, Deserialize)]
pub struct TtsConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Directory holding Piper `<voice>.onnx` models.
    #[serde(default = "default_voices_dir")]
    pub voices_dir: PathBuf,
    /// Voice used when an event names none, or names one that is missing.
    #[serde(default = "default_voice")]
    pub default_voice: String,
    #[serde(default = "default_piper_binary")]
    pub piper_binary: PathBuf,
    /// Overrides the system engine binary (`espeak-ng` / `powershell`).
    #[serde(default)]
    pub system_binary: Option<PathBuf>,
    /// Overrides the WAV player used by the Piper backend.
    #[serde(default)]
    pub player_binary: Option<PathBuf>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            voices_dir: default_voices_dir(),
            default_voice: default_voice(),
            piper_binary: default_piper_binary(),
            system_binary: None,
            player_binary: None,
        }
    }
}
