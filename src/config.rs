//! Configuration types for lease-dns.

use hickory_proto::rr::Name;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::DnsError;
use crate::lease::MAX_LEASE;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Registration listener configuration.
    pub registration: RegistrationConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Check values that deserialize fine but cannot be served.
    pub fn validate(&self) -> Result<(), DnsError> {
        self.dns.validate()?;
        self.registration.validate()
    }
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Zones served from the registry (e.g., "dyn.example.com").
    /// Query names are `<backend>.<zone>`.
    #[serde(default = "default_zones")]
    pub zones: Vec<String>,

    /// SOA record configuration.
    #[serde(default)]
    pub soa: SoaConfig,
}

impl DnsConfig {
    /// Reject an empty zone list or unparseable zone names.
    pub fn validate(&self) -> Result<(), DnsError> {
        if self.zones.is_empty() {
            return Err(DnsError::Config("dns.zones must not be empty".into()));
        }
        for zone in &self.zones {
            Name::from_ascii(zone)
                .map_err(|e| DnsError::Config(format!("invalid zone {zone:?}: {e}")))?;
        }
        Ok(())
    }
}

/// Registration listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Address for the HTTP registration listener.
    pub addr: SocketAddr,

    /// Shared secret agents send in the `secret` header.
    #[serde(default)]
    pub secret: String,

    /// Lease duration granted by each registration.
    #[serde(default = "default_host_timeout", with = "duration")]
    pub host_timeout: Duration,

    /// How long in-flight registrations may take to finish on shutdown.
    #[serde(default = "default_shutdown_grace", with = "duration")]
    pub shutdown_grace: Duration,
}

impl RegistrationConfig {
    /// Reject a zero lease duration or one past [`MAX_LEASE`]. An empty
    /// secret is allowed but rejects every registration.
    pub fn validate(&self) -> Result<(), DnsError> {
        if self.host_timeout.is_zero() {
            return Err(DnsError::Config(
                "registration.host_timeout must be greater than zero".into(),
            ));
        }
        if self.host_timeout > MAX_LEASE {
            return Err(DnsError::Config(format!(
                "registration.host_timeout must be at most {}",
                duration::format(&MAX_LEASE)
            )));
        }
        if self.secret.is_empty() {
            tracing::warn!("registration.secret is empty; all registrations will be rejected");
        }
        Ok(())
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "lease_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "lease-dns".to_string()
}

fn default_zones() -> Vec<String> {
    vec![".".to_string()]
}

fn default_host_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

/// SOA (Start of Authority) record configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoaConfig {
    /// Primary nameserver hostname (e.g., "ns1.example.com").
    pub mname: String,

    /// Admin email in DNS format (e.g., "admin.example.com" for admin@example.com).
    pub rname: String,

    /// TTL of the SOA and NS records in seconds.
    #[serde(default = "default_soa_ttl")]
    pub ttl: u32,

    /// Refresh interval in seconds.
    #[serde(default = "default_refresh")]
    pub refresh: u32,

    /// Retry interval in seconds.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Expire time in seconds.
    #[serde(default = "default_expire")]
    pub expire: u32,

    /// Minimum TTL in seconds.
    #[serde(default = "default_minimum")]
    pub minimum: u32,
}

fn default_soa_ttl() -> u32 {
    60
}

fn default_refresh() -> u32 {
    3600
}

fn default_retry() -> u32 {
    600
}

fn default_expire() -> u32 {
    604800
}

fn default_minimum() -> u32 {
    60
}

impl Default for SoaConfig {
    fn default() -> Self {
        Self {
            mname: "ns1.example.com".to_string(),
            rname: "admin.example.com".to_string(),
            ttl: default_soa_ttl(),
            refresh: default_refresh(),
            retry: default_retry(),
            expire: default_expire(),
            minimum: default_minimum(),
        }
    }
}

/// Durations as Go-style strings ("5m", "1h30m", "250ms") or whole seconds.
pub mod duration {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    /// Parse a duration such as `"300s"`, `"5m"`, `"1h30m"` or `"1.5s"`.
    pub fn parse(input: &str) -> Result<Duration, String> {
        let input = input.trim();
        if input.is_empty() {
            return Err("empty duration".into());
        }
        if input == "0" {
            return Ok(Duration::ZERO);
        }

        let mut total = Duration::ZERO;
        let mut rest = input;
        while !rest.is_empty() {
            let num_len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
            if num_len == 0 {
                return Err(format!("invalid duration {input:?}"));
            }
            let value: f64 = rest[..num_len]
                .parse()
                .map_err(|_| format!("invalid number in duration {input:?}"))?;
            rest = &rest[num_len..];

            let unit_len = rest
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(rest.len());
            let scale = match &rest[..unit_len] {
                "ns" => 1e-9,
                "us" | "µs" => 1e-6,
                "ms" => 1e-3,
                "s" => 1.0,
                "m" => 60.0,
                "h" => 3600.0,
                unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
            };
            rest = &rest[unit_len..];

            let part = Duration::try_from_secs_f64(value * scale)
                .map_err(|e| format!("duration {input:?} out of range: {e}"))?;
            total = total
                .checked_add(part)
                .ok_or_else(|| format!("duration {input:?} out of range"))?;
        }
        Ok(total)
    }

    /// Format a duration in the shape `parse` accepts.
    pub fn format(value: &Duration) -> String {
        if value.subsec_nanos() == 0 {
            format!("{}s", value.as_secs())
        } else {
            format!("{}ms", value.as_millis())
        }
    }

    pub(crate) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(de::Error::custom),
        }
    }
}
