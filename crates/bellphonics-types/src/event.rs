//! Speech event and admission decision definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Minimum length of an `event_id`, in characters.
pub const MIN_EVENT_ID_CHARS: usize = 8;

/// Maximum length of an utterance, in characters.
pub const MAX_TEXT_CHARS: usize = 240;

/// Upper bound for a per-event `cooldown_s` override.
pub const MAX_COOLDOWN_SECONDS: u64 = 3600;

/// How urgent an event is. Carried through to logs; not used for gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warn,
    Alert,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Alert => "alert",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to speak one notification.
///
/// `event_id` identifies the logical occurrence: producers retrying the same
/// notification must reuse it so the relay can suppress the replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechEvent {
    pub event_id: String,
    /// Producer-supplied event time. Informational only.
    #[serde(alias = "timestamp")]
    pub ts: f64,
    pub text: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Events sharing a key must be spaced at least the cooldown apart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_key: Option<String>,
    /// Overrides the configured default cooldown for this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
}

/// Reasons a [`SpeechEvent`] is malformed.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("event_id must be at least {min} characters", min = MIN_EVENT_ID_CHARS)]
    EventIdTooShort,
    #[error("text must not be empty")]
    EmptyText,
    #[error("text exceeds {max} characters (got {0})", max = MAX_TEXT_CHARS)]
    TextTooLong(usize),
    #[error("cooldown_s must be between 0 and {max} (got {0})", max = MAX_COOLDOWN_SECONDS)]
    CooldownOutOfRange(u64),
    #[error("volume must be between 0.0 and 1.0 (got {0})")]
    VolumeOutOfRange(f32),
}

impl SpeechEvent {
    /// Creates an event with only the required fields set.
    pub fn new(event_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            ts: 0.0,
            text: text.into(),
            severity: Severity::default(),
            room: None,
            cooldown_key: None,
            cooldown_s: None,
            voice: None,
            volume: None,
        }
    }

    pub fn with_cooldown_key(mut self, key: impl Into<String>) -> Self {
        self.cooldown_key = Some(key.into());
        self
    }

    pub fn with_cooldown_seconds(mut self, seconds: u64) -> Self {
        self.cooldown_s = Some(seconds);
        self
    }

    /// Checks the field bounds the HTTP boundary promises to enforce.
    ///
    /// # Errors
    ///
    /// Returns the first violated bound.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_id.chars().count() < MIN_EVENT_ID_CHARS {
            return Err(ValidationError::EventIdTooShort);
        }

        let text_chars = self.text.chars().count();
        if text_chars == 0 {
            return Err(ValidationError::EmptyText);
        }
        if text_chars > MAX_TEXT_CHARS {
            return Err(ValidationError::TextTooLong(text_chars));
        }

        if let Some(cooldown) = self.cooldown_s {
            if cooldown > MAX_COOLDOWN_SECONDS {
                return Err(ValidationError::CooldownOutOfRange(cooldown));
            }
        }

        if let Some(volume) = self.volume {
            // NaN fails the range check as well.
            if !(0.0..=1.0).contains(&volume) {
                return Err(ValidationError::VolumeOutOfRange(volume));
            }
        }

        Ok(())
    }
}

/// Why the admission gate accepted or rejected an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionReason {
    Ok,
    DuplicateEvent,
    Cooldown,
    RateLimited,
    ForbiddenOrigin,
    Unauthorized,
}

impl AdmissionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::DuplicateEvent => "duplicate_event",
            Self::Cooldown => "cooldown",
            Self::RateLimited => "rate_limited",
            Self::ForbiddenOrigin => "forbidden_origin",
            Self::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for AdmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one admission evaluation. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub reason: AdmissionReason,
}

impl AdmissionDecision {
    pub fn accept() -> Self {
        Self {
            allowed: true,
            reason: AdmissionReason::Ok,
        }
    }

    pub fn reject(reason: AdmissionReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}
