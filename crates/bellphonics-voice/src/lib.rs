//! Speech output for the Bellphonics relay.
//!
//! Accepted events are handed to a [`DeliveryQueue`], which speaks them one
//! at a time, in arrival order, through a [`SpeechCapability`]. The HTTP
//! caller never waits on synthesis: a backend failure is logged by the
//! queue's worker and the next job proceeds.
//!
//! Three backends are available and chosen once at startup through
//! [`SpeechBackend::from_config`]:
//!
//! | Backend | Engine |
//! |---------|--------|
//! | `mock` | logs the utterance, produces no audio |
//! | `system` | `espeak-ng`, or Windows SAPI via PowerShell |
//! | `piper` | Piper neural voices rendered to WAV and played back |

pub mod backend;
pub mod capability;
pub mod config;
pub mod error;
pub mod mock;
pub mod piper;
mod process;
pub mod queue;
pub mod system;

pub use backend::{BackendKind, ParseBackendKindError, SpeechBackend};
pub use capability::SpeechCapability;
pub use config::TtsConfig;
pub use error::VoiceError;
pub use mock::MockSpeech;
pub use piper::PiperSpeech;
pub use queue::{DeliveryQueue, QueuedJob};
pub use system::SystemSpeech;
