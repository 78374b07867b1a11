//! Logging, metrics export and optional trace export.
//!
//! - `tracing` output filtered by `RUST_LOG` or `telemetry.log_level`
//! - Prometheus scrape endpoint (with the `prometheus` feature)
//! - OTLP span export (with the `otel` feature)

use std::error::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Error type returned by telemetry setup.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Handle to installed telemetry; flushes exporters on [`TelemetryGuard::shutdown`].
#[must_use = "dropping the guard without calling shutdown loses buffered spans"]
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Flush and stop exporters.
    pub fn shutdown(self) {
        #[cfg(feature = "otel")]
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!("failed to shut down tracer provider: {}", e);
            }
        }
    }
}

/// Install the global subscriber and start configured exporters.
pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard, BoxError> {
    let filter = env_filter(&config.log_level);
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    #[cfg(feature = "otel")]
    let provider = match &config.opentelemetry {
        Some(otel) => Some(otel::provider(otel)?),
        None => None,
    };

    #[cfg(feature = "otel")]
    let registry = registry.with(provider.as_ref().map(|provider| {
        use opentelemetry::trace::TracerProvider;
        tracing_opentelemetry::layer().with_tracer(provider.tracer("lease-dns"))
    }));

    registry.try_init()?;

    #[cfg(feature = "otel")]
    if let Some(otel) = &config.opentelemetry {
        tracing::info!(endpoint = %otel.endpoint, "OTLP trace export enabled");
    }

    #[cfg(feature = "prometheus")]
    if let Some(addr) = config.prometheus_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(%addr, "prometheus exporter listening");
    }

    Ok(TelemetryGuard {
        #[cfg(feature = "otel")]
        provider,
    })
}

/// `RUST_LOG` wins over the configured level.
fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

#[cfg(feature = "otel")]
mod otel {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use opentelemetry_sdk::Resource;
    use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};

    use super::BoxError;
    use crate::config::OpenTelemetryConfig;

    pub(super) fn provider(config: &OpenTelemetryConfig) -> Result<SdkTracerProvider, BoxError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.endpoint)
            .build()?;

        let resource = Resource::builder()
            .with_attributes([
                KeyValue::new(SERVICE_NAME, config.service_name.clone()),
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
            ])
            .build();

        Ok(SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build())
    }
}

