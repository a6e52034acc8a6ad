//! Admission control for the Bellphonics relay.
//!
//! Decides whether an inbound [`SpeechEvent`](bellphonics_types::SpeechEvent)
//! may be spoken. The [`AdmissionGate`] composes four independent policies,
//! each of which is disabled when configured with a zero or empty value:
//!
//! | Policy | Component | Rejection |
//! |--------|-----------|-----------|
//! | origin allowlist | [`OriginAllowlist`] | `forbidden_origin` |
//! | shared secret | constant-time compare | `unauthorized` |
//! | per-minute cap | [`FixedWindowLimiter`] | `rate_limited` |
//! | replay suppression | [`ExpiringKeySet`] | `duplicate_event` |
//! | per-key spacing | [`ExpiringKeySet`] | `cooldown` |
//!
//! Time comes from an injected [`Clock`] so every policy can be tested
//! without real delays (see [`ManualClock`]).

mod allowlist;
mod clock;
mod expiring;
mod gate;
mod limiter;

pub use allowlist::{AllowEntry, OriginAllowlist, Resolver, SystemResolver};
pub use clock::{Clock, ManualClock, SystemClock};
pub use expiring::ExpiringKeySet;
pub use gate::{AdmissionGate, GatePolicy};
pub use limiter::{FixedWindowLimiter, RATE_WINDOW};
