//! Backend name resolution against the lease registry.

use hickory_proto::rr::RecordType;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::lease::LiveAddress;
use crate::metrics::{self, QueryResult, Timer};
use crate::state::RegistryStore;

/// Outcome of resolving a backend name for one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Live addresses of the requested family, each with its remaining TTL.
    Found(Vec<LiveAddress>),
    /// Backend unknown, or no live lease of the requested family.
    NotFound,
    /// The record type is not an address type served for backends.
    Unsupported,
}

impl Resolution {
    /// Whether the resolution produced any address.
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

/// Answers "which addresses are live for backend X" queries.
#[derive(Debug, Clone)]
pub struct ResolutionService {
    store: RegistryStore,
}

impl ResolutionService {
    /// Create a resolver over `store`.
    pub fn new(store: RegistryStore) -> Self {
        Self { store }
    }

    /// The registry this service reads.
    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    /// Resolve `backend` for `rtype` at the current instant.
    ///
    /// `A` yields IPv4 leases and `AAAA` IPv6 leases; any other type is
    /// [`Resolution::Unsupported`]. Triggers a cleanup pass when one is due.
    pub fn resolve(&self, backend: &str, rtype: RecordType) -> Resolution {
        let now = Instant::now();
        let resolution = self.resolve_at(backend, rtype, now);
        self.store.schedule_cleanup(now);
        resolution
    }

    /// Resolve `backend` for `rtype` as of `now`, without triggering cleanup.
    pub fn resolve_at(&self, backend: &str, rtype: RecordType, now: Instant) -> Resolution {
        let timer = Timer::start();
        let rtype_str = rtype.to_string();

        let wants_v4 = match rtype {
            RecordType::A => true,
            RecordType::AAAA => false,
            _ => {
                trace!(backend, rtype = ?rtype, "unsupported record type for backend");
                metrics::record_query(&rtype_str, QueryResult::Unsupported, timer.elapsed());
                return Resolution::Unsupported;
            }
        };

        let addresses: Vec<LiveAddress> = self
            .store
            .lookup(backend, now)
            .into_iter()
            .filter(|live| live.address.is_ipv4() == wants_v4)
            .collect();

        if addresses.is_empty() {
            debug!(backend, rtype = ?rtype, "no live addresses");
            metrics::record_query(&rtype_str, QueryResult::NxDomain, timer.elapsed());
            return Resolution::NotFound;
        }

        debug!(backend, rtype = ?rtype, count = addresses.len(), "resolved backend");
        metrics::record_addresses_returned(addresses.len());
        metrics::record_query(&rtype_str, QueryResult::Success, timer.elapsed());
        Resolution::Found(addresses)
    }
}
