//! Metrics instrumentation for lease-dns.
//!
//! All metrics are prefixed with `lease_dns.`

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: Duration) {
    let result_str = match result {
        QueryResult::Success => "success",
        QueryResult::NxDomain => "nxdomain",
        QueryResult::Unsupported => "unsupported",
    };

    counter!("lease_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("lease_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy)]
pub enum QueryResult {
    /// Query returned records.
    Success,
    /// Backend unknown or without live leases.
    NxDomain,
    /// Record type not served for backends.
    Unsupported,
}

/// Record the number of addresses in a successful answer.
pub fn record_addresses_returned(count: usize) {
    histogram!("lease_dns.query.addresses_returned").record(count as f64);
}

/// Record the outcome of a registration call.
pub fn record_registration(outcome: RegistrationOutcome) {
    let outcome_str = match outcome {
        RegistrationOutcome::Added => "added",
        RegistrationOutcome::Refreshed => "refreshed",
        RegistrationOutcome::MissingSecret => "missing_secret",
        RegistrationOutcome::InvalidSecret => "invalid_secret",
        RegistrationOutcome::MissingBackend => "missing_backend",
        RegistrationOutcome::InvalidAddress => "invalid_address",
    };

    counter!("lease_dns.registration.count", "outcome" => outcome_str).increment(1);
}

/// Registration outcomes.
#[derive(Debug, Clone, Copy)]
pub enum RegistrationOutcome {
    /// A previously unknown address was registered.
    Added,
    /// An existing lease was extended.
    Refreshed,
    /// No secret header.
    MissingSecret,
    /// Secret did not match.
    InvalidSecret,
    /// No backend header.
    MissingBackend,
    /// Peer address could not be normalized.
    InvalidAddress,
}

/// Record a completed cleanup pass.
pub fn record_cleanup(removed: usize, duration: Duration) {
    counter!("lease_dns.cleanup.count").increment(1);
    counter!("lease_dns.cleanup.removed.count").increment(removed as u64);
    histogram!("lease_dns.cleanup.duration.seconds").record(duration.as_secs_f64());
}

/// Record state counts (call periodically or on change).
pub fn record_state_counts(backends: usize, leases: usize) {
    gauge!("lease_dns.state.backends.count").set(backends as f64);
    gauge!("lease_dns.state.leases.count").set(leases as f64);
}

/// Record the SOA serial number.
pub fn record_serial(serial: u32) {
    gauge!("lease_dns.state.serial").set(serial as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
