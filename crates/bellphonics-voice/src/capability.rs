use crate::error::VoiceError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Something that can turn text into audible output.
///
/// Implementations must accept a different voice and volume on every call
/// and treat empty or whitespace-only text as a no-op. Errors are reported to
/// the caller, which for queued delivery means they are logged and dropped.
#[async_trait]
pub trait SpeechCapability: Send + Sync + Debug {
    async fn speak(
        &self,
        text: &str,
        voice: Option<&str>,
        volume: Option<f32>,
    ) -> Result<(), VoiceError>;
}
