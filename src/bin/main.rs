//! lease-dns binary entry point.

use clap::Parser;
use lease_dns::{telemetry, Config, DnsServer};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tripwire::Tripwire;

/// DNS server publishing self-registered backends under TTL leases.
#[derive(Parser, Debug)]
#[command(name = "lease-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "lease-dns.toml")]
    config: PathBuf,
}

fn load_config(path: &Path) -> Result<Config, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix("LEASE_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config)?;

    let telemetry =
        telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    config.validate()?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.dns.listen_addr,
        registration_addr = %config.registration.addr,
        "Starting lease-dns"
    );

    // Setup graceful shutdown
    let (tripwire, tripwire_worker) = Tripwire::new_signals();
    tokio::spawn(tripwire_worker);

    let server = DnsServer::new(config.dns, config.registration);
    let result = server.run(tripwire).await;

    telemetry.shutdown();

    if let Err(e) = result {
        error!("lease-dns error: {}", e);
        return Err(e.into());
    }

    info!("lease-dns shutdown complete");
    Ok(())
}
