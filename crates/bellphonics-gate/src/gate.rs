//! The composed admission gate.

use crate::allowlist::{OriginAllowlist, Resolver, SystemResolver};
use crate::clock::{Clock, SystemClock};
use crate::expiring::ExpiringKeySet;
use crate::limiter::FixedWindowLimiter;
use bellphonics_types::{AdmissionDecision, AdmissionReason, SpeechEvent, MAX_COOLDOWN_SECONDS};
use serde::Deserialize;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use subtle::ConstantTimeEq;

fn default_dedupe_ttl_seconds() -> u64 {
    300
}

fn default_cooldown_seconds() -> Option<u64> {
    Some(20)
}

fn default_rate_limit_per_min() -> u32 {
    20
}

fn default_dns_cache_ttl_seconds() -> u64 {
    300
}

/// Admission policy. Zero or empty values disable the corresponding check.
#[derive(Clone, Deserialize)]
pub struct GatePolicy {
    /// Shared secret callers must present. `None` skips the credential check.
    #[serde(default)]
    pub api_key: Option<String>,
    /// How long an `event_id` is remembered. `0` disables replay suppression.
    #[serde(default = "default_dedupe_ttl_seconds")]
    pub dedupe_ttl_seconds: u64,
    /// Cooldown applied when an event carries a key but no `cooldown_s`.
    /// `None` disables cooldown tracking entirely.
    #[serde(default = "default_cooldown_seconds")]
    pub default_cooldown_seconds: Option<u64>,
    /// Accepted evaluations per minute. `0` disables rate limiting.
    #[serde(default = "default_rate_limit_per_min")]
    pub rate_limit_per_min: u32,
    /// Permitted origins: literal addresses or host names. Empty permits all.
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default = "default_dns_cache_ttl_seconds")]
    pub dns_cache_ttl_seconds: u64,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            api_key: None,
            dedupe_ttl_seconds: default_dedupe_ttl_seconds(),
            default_cooldown_seconds: default_cooldown_seconds(),
            rate_limit_per_min: default_rate_limit_per_min(),
            allowlist: Vec::new(),
            dns_cache_ttl_seconds: default_dns_cache_ttl_seconds(),
        }
    }
}

impl fmt::Debug for GatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatePolicy")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("dedupe_ttl_seconds", &self.dedupe_ttl_seconds)
            .field("default_cooldown_seconds", &self.default_cooldown_seconds)
            .field("rate_limit_per_min", &self.rate_limit_per_min)
            .field("allowlist", &self.allowlist)
            .field("dns_cache_ttl_seconds", &self.dns_cache_ttl_seconds)
            .finish()
    }
}

impl GatePolicy {
    /// A gate that only suppresses replayed event ids.
    pub fn replay_only(dedupe_ttl_seconds: u64) -> Self {
        Self {
            api_key: None,
            dedupe_ttl_seconds,
            default_cooldown_seconds: None,
            rate_limit_per_min: 0,
            allowlist: Vec::new(),
            dns_cache_ttl_seconds: default_dns_cache_ttl_seconds(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[derive(Debug)]
struct GateState {
    seen_events: ExpiringKeySet,
    cooldowns: ExpiringKeySet,
    limiter: FixedWindowLimiter,
    allowlist: OriginAllowlist,
}

/// Accept/reject decision point for inbound speech events.
///
/// All mutable state sits behind a single mutex so that the check and the
/// mark in [`evaluate`](Self::evaluate) happen atomically: two concurrent
/// submissions of the same `event_id` cannot both be accepted.
pub struct AdmissionGate {
    api_key: Option<String>,
    replay_enabled: bool,
    default_cooldown: Option<Duration>,
    clock: Arc<dyn Clock>,
    state: Mutex<GateState>,
}

impl fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("replay_enabled", &self.replay_enabled)
            .field("default_cooldown", &self.default_cooldown)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl AdmissionGate {
    /// Builds a gate on the system clock and the platform resolver.
    pub fn new(policy: GatePolicy) -> Self {
        Self::with_parts(policy, Arc::new(SystemClock), Arc::new(SystemResolver))
    }

    pub fn with_parts(
        policy: GatePolicy,
        clock: Arc<dyn Clock>,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        let now = clock.now();
        let allowlist = OriginAllowlist::new(
            &policy.allowlist,
            Duration::from_secs(policy.dns_cache_ttl_seconds),
            resolver,
        );
        let default_cooldown = policy.default_cooldown_seconds.map(Duration::from_secs);

        tracing::debug!(?policy, "admission gate configured");

        Self {
            api_key: policy
                .api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            replay_enabled: policy.dedupe_ttl_seconds > 0,
            default_cooldown,
            clock,
            state: Mutex::new(GateState {
                seen_events: ExpiringKeySet::new(Duration::from_secs(policy.dedupe_ttl_seconds)),
                // No override may exceed MAX_COOLDOWN_SECONDS, so older marks can never block.
                cooldowns: ExpiringKeySet::new(Duration::from_secs(
                    MAX_COOLDOWN_SECONDS.max(policy.default_cooldown_seconds.unwrap_or(0)),
                )),
                limiter: FixedWindowLimiter::new(policy.rate_limit_per_min, now),
                allowlist,
            }),
        }
    }

    /// Decides whether `event`, arriving from `origin` with `credential`, is
    /// spoken.
    ///
    /// Checks run in a fixed order and stop at the first failure: origin,
    /// credential, rate, replay, cooldown. Only an accepted event changes the
    /// replay and cooldown stores.
    pub fn evaluate(
        &self,
        event: &SpeechEvent,
        origin: IpAddr,
        credential: Option<&str>,
    ) -> AdmissionDecision {
        let mut state = self.lock_state();
        let now = self.clock.now();

        if !state.allowlist.permits(origin, now) {
            return self.rejected(event, origin, AdmissionReason::ForbiddenOrigin);
        }

        if !self.credential_matches(credential) {
            return self.rejected(event, origin, AdmissionReason::Unauthorized);
        }

        if !state.limiter.try_acquire(now) {
            return self.rejected(event, origin, AdmissionReason::RateLimited);
        }

        if self.replay_enabled && state.seen_events.seen(&event.event_id, now) {
            return self.rejected(event, origin, AdmissionReason::DuplicateEvent);
        }

        let cooldown_key = self
            .default_cooldown
            .and_then(|default| event.cooldown_key.as_deref().map(|key| (key, default)))
            .filter(|(key, _)| !key.is_empty());

        if let Some((key, default)) = cooldown_key {
            let spacing = event.cooldown_s.map(Duration::from_secs).unwrap_or(default);
            if let Some(last) = state.cooldowns.last_seen(key, now) {
                if now.saturating_duration_since(last) < spacing {
                    return self.rejected(event, origin, AdmissionReason::Cooldown);
                }
            }
        }

        if self.replay_enabled {
            state.seen_events.mark(&event.event_id, now);
        }
        if let Some((key, _)) = cooldown_key {
            state.cooldowns.mark(key, now);
        }

        tracing::info!(
            event_id = %event.event_id,
            %origin,
            severity = %event.severity,
            "event admitted"
        );
        AdmissionDecision::accept()
    }

    fn credential_matches(&self, presented: Option<&str>) -> bool {
        let Some(expected) = self.api_key.as_deref() else {
            return true;
        };
        match presented.map(str::trim) {
            Some(presented) if !presented.is_empty() => {
                presented.as_bytes().ct_eq(expected.as_bytes()).into()
            }
            _ => false,
        }
    }

    fn rejected(
        &self,
        event: &SpeechEvent,
        origin: IpAddr,
        reason: AdmissionReason,
    ) -> AdmissionDecision {
        match reason {
            AdmissionReason::ForbiddenOrigin | AdmissionReason::Unauthorized => {
                tracing::warn!(event_id = %event.event_id, %origin, %reason, "event rejected");
            }
            _ => {
                tracing::info!(event_id = %event.event_id, %origin, %reason, "event rejected");
            }
        }
        AdmissionDecision::reject(reason)
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // Every mutation is a single map or counter update, so the
                // state behind a poisoned lock is still consistent.
                tracing::error!("admission gate lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn gate(policy: GatePolicy) -> (AdmissionGate, ManualClock) {
        let clock = ManualClock::default();
        let gate = AdmissionGate::with_parts(
            policy,
            Arc::new(clock.clone()),
            Arc::new(SystemResolver),
        );
        (gate, clock)
    }

    fn local() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn policy_debug_redacts_key() {
        let policy = GatePolicy::default().with_api_key("hunter2-secret");
        let rendered = format!("{:?}", policy);
        assert!(!rendered.contains("hunter2-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: GatePolicy = toml::from_str("rate_limit_per_min = 5").unwrap();
        assert_eq!(policy.rate_limit_per_min, 5);
        assert_eq!(policy.dedupe_ttl_seconds, 300);
        assert_eq!(policy.default_cooldown_seconds, Some(20));
        assert!(policy.allowlist.is_empty());
    }

    #[test]
    fn credential_is_case_sensitive_and_trimmed() {
        let (gate, _) = gate(GatePolicy::replay_only(300).with_api_key("Secret-Key"));
        let event = SpeechEvent::new("abc12345", "hello");

        assert_eq!(
            gate.evaluate(&event, local(), Some("secret-key")).reason,
            AdmissionReason::Unauthorized
        );
        assert_eq!(
            gate.evaluate(&event, local(), None).reason,
            AdmissionReason::Unauthorized
        );
        assert_eq!(
            gate.evaluate(&event, local(), Some("  ")).reason,
            AdmissionReason::Unauthorized
        );
        assert!(gate.evaluate(&event, local(), Some(" Secret-Key ")).allowed);
    }

    #[test]
    fn configured_key_is_trimmed_like_the_presented_one() {
        let (gate, _) = gate(GatePolicy::replay_only(300).with_api_key("secret \n"));
        let event = SpeechEvent::new("abc12345", "hello");

        assert!(gate.evaluate(&event, local(), Some("secret \n")).allowed);
        let other = SpeechEvent::new("abc99999", "hello");
        assert!(gate.evaluate(&other, local(), Some("secret")).allowed);
    }

    #[test]
    fn empty_configured_key_disables_credential_check() {
        let (gate, _) = gate(GatePolicy::replay_only(300).with_api_key(""));
        let event = SpeechEvent::new("abc12345", "hello");
        assert!(gate.evaluate(&event, local(), None).allowed);
    }

    #[test]
    fn replay_only_gate_ignores_cooldowns() {
        let (gate, _) = gate(GatePolicy::replay_only(300));
        let first = SpeechEvent::new("abc12345", "one").with_cooldown_key("door1");
        let second = SpeechEvent::new("abc99999", "two")
            .with_cooldown_key("door1")
            .with_cooldown_seconds(600);

        assert!(gate.evaluate(&first, local(), None).allowed);
        assert!(gate.evaluate(&second, local(), None).allowed);
        assert_eq!(
            gate.evaluate(&first, local(), None).reason,
            AdmissionReason::DuplicateEvent
        );
    }

    #[test]
    fn zero_dedupe_ttl_disables_replay_suppression() {
        let mut policy = GatePolicy::replay_only(0);
        policy.rate_limit_per_min = 0;
        let (gate, _) = gate(policy);
        let event = SpeechEvent::new("abc12345", "hello");
        assert!(gate.evaluate(&event, local(), None).allowed);
        assert!(gate.evaluate(&event, local(), None).allowed);
    }

    #[test]
    fn per_event_cooldown_overrides_default() {
        let mut policy = GatePolicy::replay_only(300);
        policy.default_cooldown_seconds = Some(20);
        let (gate, clock) = gate(policy);

        let first = SpeechEvent::new("abc00001", "one").with_cooldown_key("garage");
        assert!(gate.evaluate(&first, local(), None).allowed);

        clock.advance(Duration::from_secs(5));
        let short = SpeechEvent::new("abc00002", "two")
            .with_cooldown_key("garage")
            .with_cooldown_seconds(5);
        assert!(gate.evaluate(&short, local(), None).allowed);

        clock.advance(Duration::from_secs(1));
        let zero = SpeechEvent::new("abc00003", "three")
            .with_cooldown_key("garage")
            .with_cooldown_seconds(0);
        assert!(gate.evaluate(&zero, local(), None).allowed);
    }

    #[test]
    fn rejection_leaves_replay_state_untouched() {
        let mut policy = GatePolicy::replay_only(300);
        policy.default_cooldown_seconds = Some(20);
        let (gate, clock) = gate(policy);

        let first = SpeechEvent::new("abc00001", "one").with_cooldown_key("door1");
        assert!(gate.evaluate(&first, local(), None).allowed);

        clock.advance(Duration::from_secs(10));
        let blocked = SpeechEvent::new("abc00002", "two").with_cooldown_key("door1");
        assert_eq!(
            gate.evaluate(&blocked, local(), None).reason,
            AdmissionReason::Cooldown
        );

        // The rejected id was not recorded, and the cooldown clock was not
        // restarted by the rejection.
        clock.advance(Duration::from_secs(10));
        assert!(gate.evaluate(&blocked, local(), None).allowed);
    }
}
