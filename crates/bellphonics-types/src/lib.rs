//! Shared types for the Bellphonics notification relay.
//!
//! This crate provides the wire-level [`SpeechEvent`] accepted at the HTTP
//! boundary, its validation rules, and the [`AdmissionDecision`] produced by
//! the admission gate. Every other crate in the workspace depends on these
//! definitions; this crate depends on nothing internal.

pub mod event;

pub use event::{
    AdmissionDecision, AdmissionReason, Severity, SpeechEvent, ValidationError,
    MAX_COOLDOWN_SECONDS, MAX_TEXT_CHARS, MIN_EVENT_ID_CHARS,
};
