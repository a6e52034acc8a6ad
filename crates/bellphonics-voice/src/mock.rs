use crate::capability::SpeechCapability;
use crate::error::VoiceError;
use async_trait::async_trait;

/// Backend that only logs what it would have said.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockSpeech;

#[async_trait]
impl SpeechCapability for MockSpeech {
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
        tracing::info!(voice, volume, text, "mock speak");
        Ok(())
    }
}
