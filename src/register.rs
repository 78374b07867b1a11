//! Authenticated self-registration of backend addresses.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::RegisterError;
use crate::lease::canonical_address;
use crate::metrics::{self, RegistrationOutcome};
use crate::state::RegistryStore;

/// Parse a transport peer address (`ip:port`, `[v6]:port` or a bare IP)
/// into its canonical IP.
pub fn parse_peer_address(peer: &str) -> Result<IpAddr, RegisterError> {
    let ip = match peer.parse::<SocketAddr>() {
        Ok(addr) => addr.ip(),
        Err(_) => peer
            .parse::<IpAddr>()
            .map_err(|_| RegisterError::InvalidAddress(peer.to_string()))?,
    };
    Ok(canonical_address(ip))
}

/// Normalize a backend name to the form DNS lookups use.
///
/// Query names reach the authority lower-cased and without a trailing dot.
pub fn normalize_backend(name: &str) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() {
        None
    } else {
        Some(name.to_ascii_lowercase())
    }
}

/// Applies authenticated registrations to the registry.
#[derive(Debug, Clone)]
pub struct RegistrationService {
    store: RegistryStore,
    secret: Arc<str>,
    lease: Duration,
}

impl RegistrationService {
    /// Create a service that grants leases of `lease` to callers presenting `secret`.
    pub fn new(store: RegistryStore, secret: impl Into<Arc<str>>, lease: Duration) -> Self {
        Self {
            store,
            secret: secret.into(),
            lease,
        }
    }

    /// The registry this service writes to.
    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    /// Register the caller's own address under `backend`.
    ///
    /// `secret` is the raw header value; any non-empty value counts as
    /// present. `peer` is the transport-level address of the caller; a client
    /// can only ever register itself. Returns the canonical address registered.
    pub fn register(
        &self,
        secret: Option<&[u8]>,
        backend: Option<&str>,
        peer: &str,
    ) -> Result<IpAddr, RegisterError> {
        let result = self.try_register(secret, backend, peer);
        match &result {
            Ok(_) => {}
            Err(RegisterError::MissingSecret) => {
                warn!(%peer, "registration rejected: missing secret");
                metrics::record_registration(RegistrationOutcome::MissingSecret);
            }
            Err(RegisterError::InvalidSecret) => {
                warn!(%peer, "registration rejected: invalid secret");
                metrics::record_registration(RegistrationOutcome::InvalidSecret);
            }
            Err(RegisterError::MissingBackend) => {
                debug!(%peer, "registration rejected: missing backend name");
                metrics::record_registration(RegistrationOutcome::MissingBackend);
            }
            Err(RegisterError::InvalidAddress(_)) => {
                error!(%peer, "registration rejected: cannot parse peer address");
                metrics::record_registration(RegistrationOutcome::InvalidAddress);
            }
        }
        result
    }

    fn try_register(
        &self,
        secret: Option<&[u8]>,
        backend: Option<&str>,
        peer: &str,
    ) -> Result<IpAddr, RegisterError> {
        let secret = secret
            .filter(|s| !s.is_empty())
            .ok_or(RegisterError::MissingSecret)?;
        if !self.secret_matches(secret) {
            return Err(RegisterError::InvalidSecret);
        }

        let backend = backend
            .and_then(normalize_backend)
            .ok_or(RegisterError::MissingBackend)?;
        let address = parse_peer_address(peer)?;

        let now = Instant::now();
        let added = self.store.upsert(&backend, address, self.lease, now);
        metrics::record_registration(if added {
            RegistrationOutcome::Added
        } else {
            RegistrationOutcome::Refreshed
        });
        self.store.schedule_cleanup(now);

        Ok(address)
    }

    fn secret_matches(&self, provided: &[u8]) -> bool {
        // An unset secret never matches, not even an empty header.
        !self.secret.is_empty() && bool::from(provided.ct_eq(self.secret.as_bytes()))
    }
}
