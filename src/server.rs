//! DNS server setup and lifecycle management.

use hickory_server::authority::{AuthorityObject, Catalog};
use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, error, info};
use tripwire::Tripwire;

use crate::authority::DynamicAuthority;
use crate::config::{DnsConfig, RegistrationConfig};
use crate::error::DnsError;
use crate::http;
use crate::register::RegistrationService;
use crate::resolver::ResolutionService;
use crate::state::RegistryStore;

/// Interval for emitting state metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// TCP idle timeout for DNS connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Periodically emit state metrics.
async fn metrics_loop(store: RegistryStore, mut tripwire: Tripwire) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                store.emit_metrics();
                debug!(
                    backends = store.backends_count(),
                    leases = store.leases_count(),
                    "emitted state metrics"
                );
            }
            _ = &mut tripwire => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Build a catalog with one [`DynamicAuthority`] per served zone.
pub fn build_catalog(config: &DnsConfig, store: RegistryStore) -> Result<Catalog, DnsError> {
    let resolver = ResolutionService::new(store);
    let mut catalog = Catalog::new();

    for zone in &config.zones {
        let authority = DynamicAuthority::new(zone, resolver.clone(), config.soa.clone())?;
        let authority: Arc<dyn AuthorityObject> = Arc::new(authority);
        let origin = authority.origin().clone();
        info!(zone = %origin, "serving zone");
        catalog.upsert(origin, vec![authority]);
    }

    Ok(catalog)
}

/// DNS server plus registration listener sharing one lease registry.
pub struct DnsServer {
    dns: DnsConfig,
    registration: RegistrationConfig,
    store: RegistryStore,
}

impl DnsServer {
    /// Create a new server with the given configuration and an empty registry.
    pub fn new(dns: DnsConfig, registration: RegistrationConfig) -> Self {
        Self {
            dns,
            registration,
            store: RegistryStore::new(),
        }
    }

    /// Get a reference to the lease registry.
    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    /// Run the DNS server and registration listener until the tripwire is triggered.
    ///
    /// Failing to bind any listener is fatal and returned before serving starts.
    pub async fn run(self, tripwire: Tripwire) -> Result<(), DnsError> {
        info!(
            listen_addr = %self.dns.listen_addr,
            registration_addr = %self.registration.addr,
            zones = ?self.dns.zones,
            host_timeout_secs = self.registration.host_timeout.as_secs(),
            "Starting lease-dns server"
        );

        let http_listener = TcpListener::bind(self.registration.addr).await?;
        info!(addr = %self.registration.addr, "registration listener bound");

        let catalog = build_catalog(&self.dns, self.store.clone())?;
        let mut server = ServerFuture::new(catalog);

        // Bind UDP
        let udp_socket = UdpSocket::bind(self.dns.listen_addr).await?;
        info!(addr = %self.dns.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        // Bind TCP
        let tcp_listener = TcpListener::bind(self.dns.listen_addr).await?;
        info!(addr = %self.dns.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        let service = RegistrationService::new(
            self.store.clone(),
            self.registration.secret.as_str(),
            self.registration.host_timeout,
        );
        let http_tripwire = tripwire.clone();
        let grace = self.registration.shutdown_grace;
        let http_handle = tokio::spawn(async move {
            if let Err(e) = http::serve(http_listener, service, http_tripwire, grace).await {
                error!("Registration listener error: {}", e);
            }
        });

        // Start metrics loop
        let metrics_store = self.store.clone();
        let metrics_tripwire = tripwire.clone();
        let metrics_handle = tokio::spawn(async move {
            metrics_loop(metrics_store, metrics_tripwire).await;
        });

        // Emit initial metrics
        self.store.emit_metrics();

        info!(zones = ?self.dns.zones, "DNS server ready to serve queries");

        // Run server until tripwire
        tokio::select! {
            _ = tripwire => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
            }
        }

        // Wait for metrics loop to stop
        let _ = metrics_handle.await;

        info!("Waiting for registration listener to stop...");
        let _ = http_handle.await;

        info!("DNS server stopped");
        Ok(())
    }
}
