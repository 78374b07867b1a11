//! In-memory lease registry shared by the registration and DNS paths.
//!
//! Expiry is lazy: lookups filter dead leases without removing them, and a
//! cleanup pass sweeps them out only once the global watermark says some
//! backend actually has an expired lease.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::lease::{canonical_address, BackendRegistry, LiveAddress};
use crate::metrics;

/// Thread-safe registry of backend leases.
///
/// Clones share the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct RegistryStore {
    inner: Arc<RwLock<StoreInner>>,
    cleanup_running: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct StoreInner {
    /// backend name -> leases
    registries: HashMap<String, BackendRegistry>,

    /// Earliest expiry across all registries; `None` iff the store is empty.
    next_expiry: Option<Instant>,

    /// Last time an address was added or removed.
    last_change: Option<Instant>,

    /// Serial for SOA (incremented on structural changes)
    serial: u32,
}

impl StoreInner {
    fn record_change(&mut self, now: Instant) {
        self.last_change = Some(now);
        self.serial = self.serial.wrapping_add(1);
    }

    /// Fold a single registry's watermark change into the global one.
    ///
    /// Only a full rescan can tell what the new minimum is when the registry
    /// that held it moved later.
    fn update_next_expiry(&mut self, before: Option<Instant>, after: Option<Instant>) {
        self.next_expiry = match (self.next_expiry, after) {
            (None, after) => after,
            (Some(global), Some(after)) if after < global => Some(after),
            (Some(global), _) if before == Some(global) => self.scan_next_expiry(),
            (global, _) => global,
        };
    }

    fn scan_next_expiry(&self) -> Option<Instant> {
        self.registries
            .values()
            .filter_map(BackendRegistry::next_expiry)
            .min()
    }
}

/// Clears the in-flight flag when a cleanup pass ends, even by panic.
struct CleanupGuard(Arc<AtomicBool>);

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RegistryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh `address` under `backend` with a lease of `lease`.
    ///
    /// Every call resets the expiry to `now + lease`. Returns `true` when the
    /// address is new for this backend.
    pub fn upsert(&self, backend: &str, address: IpAddr, lease: Duration, now: Instant) -> bool {
        let address = canonical_address(address);
        let mut inner = self.inner.write();

        let registry = inner.registries.entry(backend.to_string()).or_default();
        let before = registry.next_expiry();
        let added = registry.upsert(address, lease, now);
        let after = registry.next_expiry();

        if added {
            info!(%address, backend, "registering address");
            inner.record_change(now);
        } else {
            debug!(%address, backend, "refreshed lease");
        }
        inner.update_next_expiry(before, after);

        added
    }

    /// Live addresses for `backend` at `now`, each with its remaining TTL.
    ///
    /// Unknown and fully expired backends both give an empty vec. Never
    /// mutates the store.
    pub fn lookup(&self, backend: &str, now: Instant) -> Vec<LiveAddress> {
        let inner = self.inner.read();
        inner
            .registries
            .get(backend)
            .map(|registry| registry.live(now))
            .unwrap_or_default()
    }

    /// Sweep expired leases out of every backend that is due at `now`.
    ///
    /// Backends whose watermark is still in the future are skipped, and the
    /// write lock is held for one backend at a time. Returns the number of
    /// leases removed.
    pub fn cleanup(&self, now: Instant) -> usize {
        let due: Vec<String> = {
            let inner = self.inner.read();
            if !inner.next_expiry.is_some_and(|at| at <= now) {
                return 0;
            }
            inner
                .registries
                .iter()
                .filter(|(_, registry)| registry.is_due(now))
                .map(|(name, _)| name.clone())
                .collect()
        };

        let timer = metrics::Timer::start();
        let mut removed_total = 0;

        for backend in &due {
            let mut inner = self.inner.write();
            let Some(registry) = inner.registries.get_mut(backend) else {
                continue;
            };

            let before = registry.next_expiry();
            let removed = registry.sweep(now);
            let after = registry.next_expiry();
            let emptied = registry.is_empty();
            for address in &removed {
                info!(%address, backend = %backend, "removing expired address");
            }
            if emptied {
                inner.registries.remove(backend);
                debug!(backend = %backend, "removed empty backend");
            }
            if !removed.is_empty() {
                inner.record_change(now);
                removed_total += removed.len();
            }
            inner.update_next_expiry(before, after);
        }

        {
            let mut inner = self.inner.write();
            inner.next_expiry = inner.scan_next_expiry();
        }

        metrics::record_cleanup(removed_total, timer.elapsed());
        debug!(
            due = due.len(),
            removed = removed_total,
            "cleanup pass complete"
        );
        removed_total
    }

    /// Whether some lease has run out at `now` and a cleanup pass would do work.
    pub fn cleanup_due(&self, now: Instant) -> bool {
        self.inner.read().next_expiry.is_some_and(|at| at <= now)
    }

    /// Start a cleanup pass if one is due and none is already running.
    ///
    /// Runs on the current tokio runtime without waiting for it, or inline
    /// when called outside a runtime. Returns `true` if a pass was started.
    pub fn schedule_cleanup(&self, now: Instant) -> bool {
        if !self.cleanup_due(now) {
            return false;
        }
        if self
            .cleanup_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let guard = CleanupGuard(self.cleanup_running.clone());
        let store = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _guard = guard;
                    store.cleanup(Instant::now());
                });
            }
            Err(_) => {
                let _guard = guard;
                store.cleanup(now);
            }
        }
        true
    }

    /// Whether a cleanup pass is currently in flight.
    pub fn is_cleanup_running(&self) -> bool {
        self.cleanup_running.load(Ordering::Acquire)
    }

    /// Earliest expiry across all backends.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.inner.read().next_expiry
    }

    /// Last time an address was added or removed.
    pub fn last_change(&self) -> Option<Instant> {
        self.inner.read().last_change
    }

    /// Get current SOA serial.
    pub fn serial(&self) -> u32 {
        self.inner.read().serial
    }

    /// Whether `backend` has a registry (live or awaiting sweep).
    pub fn has_backend(&self, backend: &str) -> bool {
        self.inner.read().registries.contains_key(backend)
    }

    /// Get count of backends.
    pub fn backends_count(&self) -> usize {
        self.inner.read().registries.len()
    }

    /// Get count of leases, including expired ones not yet swept.
    pub fn leases_count(&self) -> usize {
        self.inner
            .read()
            .registries
            .values()
            .map(BackendRegistry::len)
            .sum()
    }

    /// Emit current state metrics.
    pub fn emit_metrics(&self) {
        let inner = self.inner.read();
        let leases = inner.registries.values().map(BackendRegistry::len).sum();
        metrics::record_state_counts(inner.registries.len(), leases);
        metrics::record_serial(inner.serial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(300);

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn addrs(live: &[LiveAddress]) -> Vec<IpAddr> {
        live.iter().map(|l| l.address).collect()
    }

    #[test]
    fn test_register_then_lookup_full_ttl() {
        let store = RegistryStore::new();
        let t0 = Instant::now();

        store.upsert("web", ip("10.0.0.1"), LEASE, t0);

        let live = store.lookup("web", t0);
        assert_eq!(
            live,
            vec![LiveAddress {
                address: ip("10.0.0.1"),
                ttl: 300
            }]
        );
    }

    #[test]
    fn test_ttl_counts_down() {
        let store = RegistryStore::new();
        let t0 = Instant::now();
        store.upsert("web", ip("10.0.0.1"), LEASE, t0);

        let live = store.lookup("web", t0 + Duration::from_millis(120_500));
        assert_eq!(live[0].ttl, 179);

        let live = store.lookup("web", t0 + Duration::from_millis(299_999));
        assert_eq!(live[0].ttl, 1);
    }

    #[test]
    fn test_expired_not_returned_before_cleanup() {
        let store = RegistryStore::new();
        let t0 = Instant::now();
        store.upsert("web", ip("10.0.0.1"), LEASE, t0);

        assert!(store.lookup("web", t0 + LEASE).is_empty());
        assert!(store.lookup("web", t0 + Duration::from_secs(301)).is_empty());
        // Lookup never sweeps.
        assert_eq!(store.leases_count(), 1);
        assert!(store.has_backend("web"));
    }

    #[test]
    fn test_unknown_backend_is_empty() {
        let store = RegistryStore::new();
        assert!(store.lookup("nope", Instant::now()).is_empty());
    }

    #[test]
    fn test_refresh_keeps_one_address_alive() {
        let store = RegistryStore::new();
        let t0 = Instant::now();
        store.upsert("web", ip("10.0.0.1"), LEASE, t0);
        store.upsert("web", ip("10.0.0.2"), LEASE, t0);

        // Only 10.0.0.2 heartbeats partway through.
        store.upsert("web", ip("10.0.0.2"), LEASE, t0 + Duration::from_secs(200));

        let live = store.lookup("web", t0 + Duration::from_secs(301));
        assert_eq!(addrs(&live), vec![ip("10.0.0.2")]);
        assert_eq!(live[0].ttl, 199);
    }

    #[test]
    fn test_equivalent_forms_share_a_lease() {
        let store = RegistryStore::new();
        let t0 = Instant::now();

        assert!(store.upsert("web", ip("fd00:0:0:0::1"), LEASE, t0));
        assert!(!store.upsert("web", ip("fd00::0001"), LEASE, t0));
        assert!(store.upsert("web", ip("::ffff:10.0.0.1"), LEASE, t0));
        assert!(!store.upsert("web", ip("10.0.0.1"), LEASE, t0));

        assert_eq!(store.leases_count(), 2);
        assert_eq!(
            addrs(&store.lookup("web", t0)),
            vec![ip("10.0.0.1"), ip("fd00::1")]
        );
    }

    #[test]
    fn test_oversized_lease_registers_without_panicking() {
        let store = RegistryStore::new();
        let t0 = Instant::now();

        assert!(store.upsert("web", ip("10.0.0.1"), Duration::MAX, t0));

        assert_eq!(store.backends_count(), 1);
        assert_eq!(store.leases_count(), 1);
        assert_eq!(store.next_expiry(), Some(t0 + crate::lease::MAX_LEASE));
    }

    #[test]
    fn test_backends_are_isolated() {
        let store = RegistryStore::new();
        let t0 = Instant::now();
        store.upsert("a", ip("10.0.0.1"), LEASE, t0);
        store.upsert("b", ip("10.0.0.2"), LEASE, t0);

        assert_eq!(addrs(&store.lookup("a", t0)), vec![ip("10.0.0.1")]);
        assert_eq!(addrs(&store.lookup("b", t0)), vec![ip("10.0.0.2")]);
    }

    #[test]
    fn test_last_change_moves_only_on_structural_change() {
        let store = RegistryStore::new();
        let t0 = Instant::now();
        assert_eq!(store.last_change(), None);

        store.upsert("web", ip("10.0.0.1"), LEASE, t0);
        assert_eq!(store.last_change(), Some(t0));
        let serial = store.serial();

        // Heartbeat: no topology change.
        store.upsert("web", ip("10.0.0.1"), LEASE, t0 + Duration::from_secs(60));
        assert_eq!(store.last_change(), Some(t0));
        assert_eq!(store.serial(), serial);

        let sweep_at = t0 + Duration::from_secs(400);
        store.cleanup(sweep_at);
        assert_eq!(store.last_change(), Some(sweep_at));
        assert_eq!(store.serial(), serial + 1);
    }

    #[test]
    fn test_global_watermark_is_minimum() {
        let store = RegistryStore::new();
        let t0 = Instant::now();
        assert_eq!(store.next_expiry(), None);

        store.upsert("a", ip("10.0.0.1"), LEASE, t0);
        store.upsert("b", ip("10.0.0.2"), LEASE, t0 + Duration::from_secs(10));
        assert_eq!(store.next_expiry(), Some(t0 + LEASE));

        // Refresh the backend holding the minimum; the other one takes over.
        store.upsert("a", ip("10.0.0.1"), LEASE, t0 + Duration::from_secs(20));
        assert_eq!(store.next_expiry(), Some(t0 + Duration::from_secs(10) + LEASE));

        // A shorter lease elsewhere lowers it again.
        store.upsert("c", ip("10.0.0.3"), Duration::from_secs(5), t0);
        assert_eq!(store.next_expiry(), Some(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_cleanup_removes_expired_and_empty_backends() {
        let store = RegistryStore::new();
        let t0 = Instant::now();
        store.upsert("old", ip("10.0.0.1"), Duration::from_secs(10), t0);
        store.upsert("mixed", ip("10.0.0.2"), Duration::from_secs(10), t0);
        store.upsert("mixed", ip("10.0.0.3"), LEASE, t0);
        store.upsert("fresh", ip("10.0.0.4"), LEASE, t0);

        let removed = store.cleanup(t0 + Duration::from_secs(10));

        assert_eq!(removed, 2);
        assert!(!store.has_backend("old"));
        assert!(store.has_backend("mixed"));
        assert!(store.has_backend("fresh"));
        assert_eq!(store.leases_count(), 2);
        assert_eq!(store.next_expiry(), Some(t0 + LEASE));
    }

    #[test]
    fn test_cleanup_not_due_is_noop() {
        let store = RegistryStore::new();
        let t0 = Instant::now();
        store.upsert("web", ip("10.0.0.1"), LEASE, t0);
        let serial = store.serial();

        assert_eq!(store.cleanup(t0 + Duration::from_secs(299)), 0);
        assert_eq!(store.cleanup(t0 + Duration::from_secs(299)), 0);
        assert_eq!(store.serial(), serial);
        assert_eq!(store.leases_count(), 1);
    }

    #[test]
    fn test_cleanup_empties_store() {
        let store = RegistryStore::new();
        let t0 = Instant::now();
        store.upsert("web", ip("10.0.0.1"), LEASE, t0);

        store.cleanup(t0 + LEASE);

        assert_eq!(store.backends_count(), 0);
        assert_eq!(store.next_expiry(), None);
        assert!(!store.cleanup_due(t0 + Duration::from_secs(3600)));
    }

    #[test]
    fn test_cleanup_never_changes_lookup_results() {
        let t0 = Instant::now();
        let build = || {
            let store = RegistryStore::new();
            store.upsert("web", ip("10.0.0.1"), Duration::from_secs(10), t0);
            store.upsert("web", ip("10.0.0.2"), Duration::from_secs(30), t0);
            store.upsert("api", ip("10.0.0.3"), Duration::from_secs(20), t0);
            store
        };
        let swept = build();
        let untouched = build();

        for secs in [0u64, 5, 10, 15, 20, 25, 30, 35] {
            let now = t0 + Duration::from_secs(secs);
            swept.cleanup(now);
            swept.cleanup(now);
            for backend in ["web", "api"] {
                assert_eq!(
                    swept.lookup(backend, now),
                    untouched.lookup(backend, now),
                    "backend {backend} at t={secs}s"
                );
            }
        }
    }

    #[test]
    fn test_schedule_cleanup_runs_inline_without_runtime() {
        let store = RegistryStore::new();
        let t0 = Instant::now();
        store.upsert("web", ip("10.0.0.1"), Duration::from_secs(1), t0);

        assert!(!store.schedule_cleanup(t0));
        assert!(store.schedule_cleanup(t0 + Duration::from_secs(2)));
        assert_eq!(store.backends_count(), 0);
        assert!(!store.is_cleanup_running());
    }

    #[test]
    fn test_schedule_cleanup_skipped_while_in_flight() {
        let store = RegistryStore::new();
        let t0 = Instant::now();
        store.upsert("web", ip("10.0.0.1"), Duration::from_secs(1), t0);

        store.cleanup_running.store(true, Ordering::Release);
        assert!(!store.schedule_cleanup(t0 + Duration::from_secs(2)));
        assert_eq!(store.leases_count(), 1);

        store.cleanup_running.store(false, Ordering::Release);
        assert!(store.schedule_cleanup(t0 + Duration::from_secs(2)));
        assert_eq!(store.leases_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_cleanup_spawns_on_runtime() {
        let store = RegistryStore::new();
        store.upsert("web", ip("10.0.0.1"), Duration::from_secs(1), Instant::now());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.schedule_cleanup(Instant::now()));
        // A second trigger collapses into the pass already queued.
        assert!(!store.schedule_cleanup(Instant::now()));

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.backends_count(), 0);
        assert!(!store.is_cleanup_running());
    }

    #[test]
    fn test_concurrent_upserts_and_lookups() {
        let store = RegistryStore::new();
        let t0 = Instant::now();

        let handles: Vec<_> = (0..8u8)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..200u8 {
                        let addr = IpAddr::from([10, worker, 0, i]);
                        let now = t0 + Duration::from_millis(i as u64);
                        store.upsert("web", addr, Duration::from_millis(50), now);
                        let _ = store.lookup("web", now);
                        store.cleanup(now);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Everything left is exactly what is still live at the end.
        let end = t0 + Duration::from_millis(199);
        store.cleanup(end);
        let live = store.lookup("web", end);
        assert_eq!(live.len(), store.leases_count());
        assert_eq!(store.next_expiry().is_some(), !live.is_empty());
        assert!(!store.cleanup_due(end));
    }
}
