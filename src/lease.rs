//! Address leases and the per-backend lease set.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;

/// Fold an address into its canonical form.
///
/// IPv4-mapped IPv6 addresses (`::ffff:10.0.0.1`) collapse to plain IPv4 so
/// both spellings of the same host share one lease.
pub fn canonical_address(addr: IpAddr) -> IpAddr {
    addr.to_canonical()
}

/// Longest lease granted; longer requests are capped to this.
///
/// Roughly the 290-year range of a signed 64-bit nanosecond count.
pub const MAX_LEASE: Duration = Duration::from_secs(290 * 365 * 24 * 60 * 60);

/// Expiry instant for a lease of `lease` starting at `now`.
///
/// The lease is capped to [`MAX_LEASE`]. If the clock still cannot represent
/// the result the lease is treated as already expired.
pub fn lease_expiry(now: Instant, lease: Duration) -> Instant {
    now.checked_add(lease.min(MAX_LEASE)).unwrap_or(now)
}

/// A single registered address and the instant its lease runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressLease {
    /// Canonical address.
    pub address: IpAddr,
    /// The lease is dead at and after this instant.
    pub expires_at: Instant,
}

impl AddressLease {
    /// Whether the lease is still live at `now`.
    pub fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }

    /// Whole seconds left on the lease, or `None` once it has expired.
    ///
    /// A live lease with less than a second left still reports 1.
    pub fn remaining_ttl(&self, now: Instant) -> Option<u32> {
        if !self.is_live(now) {
            return None;
        }
        let secs = self.expires_at.duration_since(now).as_secs();
        Some(secs.clamp(1, u32::MAX as u64) as u32)
    }
}

/// A live address returned from a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveAddress {
    /// Canonical address.
    pub address: IpAddr,
    /// Remaining lease in whole seconds, always at least 1.
    pub ttl: u32,
}

/// All leases registered under one backend name.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    leases: BTreeMap<IpAddr, AddressLease>,
    /// Earliest `expires_at` over `leases`; `None` iff empty.
    next_expiry: Option<Instant>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh `address`, setting its expiry to `now + lease`.
    ///
    /// Returns `true` when the address was not known before.
    pub fn upsert(&mut self, address: IpAddr, lease: Duration, now: Instant) -> bool {
        let address = canonical_address(address);
        let expires_at = lease_expiry(now, lease);
        let added = self
            .leases
            .insert(
                address,
                AddressLease {
                    address,
                    expires_at,
                },
            )
            .is_none();
        self.recompute_next_expiry();
        added
    }

    /// Remove every lease with `expires_at <= now`, returning the removed addresses.
    pub fn sweep(&mut self, now: Instant) -> Vec<IpAddr> {
        let mut removed = Vec::new();
        self.leases.retain(|addr, lease| {
            if lease.is_live(now) {
                true
            } else {
                removed.push(*addr);
                false
            }
        });
        if !removed.is_empty() {
            self.recompute_next_expiry();
        }
        removed
    }

    /// Live leases at `now` with their remaining TTLs, ordered by address.
    pub fn live(&self, now: Instant) -> Vec<LiveAddress> {
        self.leases
            .values()
            .filter_map(|lease| {
                lease.remaining_ttl(now).map(|ttl| LiveAddress {
                    address: lease.address,
                    ttl,
                })
            })
            .collect()
    }

    /// Lease for a given address, if registered (live or not yet swept).
    pub fn get(&self, address: &IpAddr) -> Option<&AddressLease> {
        self.leases.get(&canonical_address(*address))
    }

    /// Cached earliest expiry.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.next_expiry
    }

    /// Whether this registry's earliest lease has run out at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_expiry.is_some_and(|at| at <= now)
    }

    /// Number of leases, expired-but-unswept included.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    /// Whether the registry holds no leases.
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    fn recompute_next_expiry(&mut self) {
        self.next_expiry = self.leases.values().map(|l| l.expires_at).min();
    }
}
