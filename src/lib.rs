//! Lease DNS - self-registering backends resolved over DNS.
//!
//! Backends announce themselves over an authenticated HTTP call and are
//! published as address records until their lease runs out. Each
//! registration covers the caller's own transport address for a fixed TTL;
//! repeating it refreshes the lease. Expired leases are never served and are
//! swept lazily once the earliest known expiry has passed.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                           lease-dns                           │
//! │                                                               │
//! │  POST /register ──▶ ┌─────────────────────┐                   │
//! │  secret, backend    │ RegistrationService │                   │
//! │                     └──────────┬──────────┘                   │
//! │                                ▼                              │
//! │                     ┌─────────────────────┐                   │
//! │                     │    RegistryStore    │◀── cleanup pass   │
//! │                     │ backend ▶ ip ▶ lease│    (watermarks)   │
//! │                     └──────────┬──────────┘                   │
//! │                                ▼                              │
//! │  UDP/TCP :53 ─────▶ ┌─────────────────────┐                   │
//! │                     │   DynamicAuthority  │                   │
//! │                     │ (ResolutionService) │                   │
//! │                     └─────────────────────┘                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! web.dyn.example.com  A
//!   → backend "web"
//!   → live IPv4 leases, TTL = seconds left on each lease
//!   → NXDOMAIN when none are live or the type is not A/AAAA
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use lease_dns::{DnsConfig, DnsServer, RegistrationConfig, SoaConfig};
//! use std::time::Duration;
//! use tripwire::Tripwire;
//!
//! #[tokio::main]
//! async fn main() {
//!     let dns = DnsConfig {
//!         listen_addr: "[::]:5353".parse().unwrap(),
//!         zones: vec!["dyn.example.com".to_string()],
//!         soa: SoaConfig::default(),
//!     };
//!     let registration = RegistrationConfig {
//!         addr: "[::]:8053".parse().unwrap(),
//!         secret: "s3cret".to_string(),
//!         host_timeout: Duration::from_secs(300),
//!         shutdown_grace: Duration::from_secs(10),
//!     };
//!
//!     let (tripwire, worker) = Tripwire::new_signals();
//!     tokio::spawn(worker);
//!
//!     DnsServer::new(dns, registration).run(tripwire).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod authority;
pub mod config;
pub mod error;
pub mod http;
pub mod lease;
pub mod metrics;
pub mod register;
pub mod resolver;
pub mod server;
pub mod state;
pub mod telemetry;

// Re-export main types
pub use authority::DynamicAuthority;
pub use config::{Config, DnsConfig, RegistrationConfig, SoaConfig, TelemetryConfig};
pub use error::{DnsError, RegisterError};
pub use register::RegistrationService;
pub use resolver::{Resolution, ResolutionService};
pub use server::DnsServer;
pub use state::RegistryStore;
