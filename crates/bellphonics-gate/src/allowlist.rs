//! Origin allowlisting with cached name resolution.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Resolves a host name to the addresses it currently maps to.
///
/// Implementations return an empty list when the name cannot be resolved;
/// an unresolvable allowlist entry simply never matches.
pub trait Resolver: Send + Sync + Debug {
    fn resolve(&self, name: &str) -> Vec<IpAddr>;
}

/// Resolver backed by the platform's name service.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, name: &str) -> Vec<IpAddr> {
        match (name, 0u16).to_socket_addrs() {
            Ok(addrs) => addrs.map(|addr| addr.ip().to_canonical()).collect(),
            Err(e) => {
                tracing::debug!(name, error = %e, "allowlist name did not resolve");
                Vec::new()
            }
        }
    }
}

/// One configured allowlist rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowEntry {
    Address(IpAddr),
    Name(String),
}

impl AllowEntry {
    /// Classifies a configured value. Returns `None` for blank entries.
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim();
        if value.is_empty() {
            return None;
        }
        match value.parse::<IpAddr>() {
            Ok(addr) => Some(Self::Address(addr.to_canonical())),
            Err(_) => Some(Self::Name(value.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
struct OriginCacheEntry {
    addresses: HashSet<IpAddr>,
    resolved_at: Instant,
}

/// Set of permitted origins.
///
/// An empty allowlist permits every origin. Name entries are resolved on
/// first use and the result is trusted for `cache_ttl`; after that the name
/// is resolved again before the entry is consulted.
#[derive(Debug)]
pub struct OriginAllowlist {
    entries: Vec<AllowEntry>,
    cache: HashMap<String, OriginCacheEntry>,
    cache_ttl: Duration,
    resolver: Arc<dyn Resolver>,
}

impl OriginAllowlist {
    pub fn new<I, S>(entries: I, cache_ttl: Duration, resolver: Arc<dyn Resolver>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .filter_map(|raw| AllowEntry::parse(raw.as_ref()))
                .collect(),
            cache: HashMap::new(),
            cache_ttl,
            resolver,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[AllowEntry] {
        &self.entries
    }

    /// Returns whether `origin` matches any configured entry.
    pub fn permits(&mut self, origin: IpAddr, now: Instant) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        let origin = origin.to_canonical();

        // Literal addresses first: they never need the resolver.
        if self
            .entries
            .iter()
            .any(|entry| matches!(entry, AllowEntry::Address(addr) if *addr == origin))
        {
            return true;
        }

        let names: Vec<String> = self
            .entries
            .iter()
            .filter_map(|entry| match entry {
                AllowEntry::Name(name) => Some(name.clone()),
                AllowEntry::Address(_) => None,
            })
            .collect();

        names
            .iter()
            .any(|name| self.resolve_cached(name, now).contains(&origin))
    }

    fn resolve_cached(&mut self, name: &str, now: Instant) -> HashSet<IpAddr> {
        if let Some(cached) = self.cache.get(name) {
            if now.saturating_duration_since(cached.resolved_at) < self.cache_ttl {
                return cached.addresses.clone();
            }
        }

        let addresses: HashSet<IpAddr> = self
            .resolver
            .resolve(name)
            .into_iter()
            .map(|addr| addr.to_canonical())
            .collect();

        if addresses.is_empty() {
            // A stale entry must not outlive a failed refresh.
            self.cache.remove(name);
        } else {
            tracing::debug!(name, count = addresses.len(), "resolved allowlist name");
            self.cache.insert(
                name.to_string(),
                OriginCacheEntry {
                    addresses: addresses.clone(),
                    resolved_at: now,
                },
            );
        }
        addresses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Resolver driven by a mutable table, counting lookups.
    #[derive(Debug, Default)]
    struct TableResolver {
        table: Mutex<HashMap<String, Vec<IpAddr>>>,
        lookups: Mutex<u32>,
    }

    impl TableResolver {
        fn set(&self, name: &str, addrs: &[&str]) {
            self.table.lock().unwrap().insert(
                name.to_string(),
                addrs.iter().map(|a| a.parse().unwrap()).collect(),
            );
        }

        fn lookups(&self) -> u32 {
            *self.lookups.lock().unwrap()
        }
    }

    impl Resolver for TableResolver {
        fn resolve(&self, name: &str) -> Vec<IpAddr> {
            *self.lookups.lock().unwrap() += 1;
            self.table
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .unwrap_or_default()
        }
    }

    const TTL: Duration = Duration::from_secs(300);

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn empty_allowlist_permits_everyone() {
        let mut list = OriginAllowlist::new(Vec::<String>::new(), TTL, Arc::new(SystemResolver));
        assert!(list.permits(ip("203.0.113.9"), Instant::now()));
        assert!(list.permits(ip("::1"), Instant::now()));
    }

    #[test]
    fn blank_entries_are_ignored() {
        let list = OriginAllowlist::new([" ", "", "10.0.0.5 "], TTL, Arc::new(SystemResolver));
        assert_eq!(list.entries(), &[AllowEntry::Address(ip("10.0.0.5"))]);
    }

    #[test]
    fn literal_match_skips_resolver() {
        let resolver = Arc::new(TableResolver::default());
        let mut list = OriginAllowlist::new(["10.0.0.5", "hub.local"], TTL, resolver.clone());
        assert!(list.permits(ip("10.0.0.5"), Instant::now()));
        assert_eq!(resolver.lookups(), 0);
    }

    #[test]
    fn ipv4_mapped_origin_matches_literal() {
        let mut list = OriginAllowlist::new(["10.0.0.5"], TTL, Arc::new(SystemResolver));
        assert!(list.permits(ip("::ffff:10.0.0.5"), Instant::now()));
    }

    #[test]
    fn names_resolve_and_deny_others() {
        let resolver = Arc::new(TableResolver::default());
        resolver.set("hub.local", &["192.168.1.20", "192.168.1.21"]);
        let mut list = OriginAllowlist::new(["hub.local"], TTL, resolver.clone());
        let now = Instant::now();

        assert!(list.permits(ip("192.168.1.21"), now));
        assert!(!list.permits(ip("192.168.1.99"), now));
        // Second query served from cache.
        assert_eq!(resolver.lookups(), 1);
    }

    #[test]
    fn any_entry_may_match() {
        let resolver = Arc::new(TableResolver::default());
        resolver.set("kitchen.local", &["192.168.1.30"]);
        let mut list =
            OriginAllowlist::new(["unknown.local", "kitchen.local"], TTL, resolver.clone());
        assert!(list.permits(ip("192.168.1.30"), Instant::now()));
    }

    #[test]
    fn unresolvable_name_never_matches_and_is_not_cached() {
        let resolver = Arc::new(TableResolver::default());
        let mut list = OriginAllowlist::new(["ghost.local"], TTL, resolver.clone());
        let now = Instant::now();
        assert!(!list.permits(ip("192.168.1.30"), now));
        assert!(!list.permits(ip("192.168.1.30"), now));
        assert_eq!(resolver.lookups(), 2);
    }

    #[test]
    fn expired_cache_entry_is_re_resolved() {
        let resolver = Arc::new(TableResolver::default());
        resolver.set("hub.local", &["192.168.1.20"]);
        let mut list = OriginAllowlist::new(["hub.local"], TTL, resolver.clone());
        let start = Instant::now();
        assert!(list.permits(ip("192.168.1.20"), start));

        // The host moved; the cached answer is still authoritative until TTL.
        resolver.set("hub.local", &["192.168.1.40"]);
        assert!(list.permits(ip("192.168.1.20"), start + Duration::from_secs(299)));
        assert!(!list.permits(ip("192.168.1.40"), start + Duration::from_secs(299)));

        let later = start + TTL;
        assert!(!list.permits(ip("192.168.1.20"), later));
        assert!(list.permits(ip("192.168.1.40"), later));
    }

    #[test]
    fn failed_refresh_drops_stale_addresses() {
        let resolver = Arc::new(TableResolver::default());
        resolver.set("hub.local", &["192.168.1.20"]);
        let mut list = OriginAllowlist::new(["hub.local"], TTL, resolver.clone());
        let start = Instant::now();
        assert!(list.permits(ip("192.168.1.20"), start));

        resolver.table.lock().unwrap().clear();
        assert!(!list.permits(ip("192.168.1.20"), start + TTL));
    }
}
