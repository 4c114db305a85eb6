use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vigil_enrich::config::EnrichConfig;
use vigil_enrich::geoip::GeoProvider;
use vigil_enrich::intel::{CachingProvider, ExternalProvider};
use vigil_enrich::worker;
use vigil_fabric::{FabricClient, FabricConfig};
use vigil_state::{StateCache, StateConfig};

#[derive(Parser, Debug)]
#[command(name = "vigil-enrich", version, about = "Vigil enrichment worker")]
struct Cli {
    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level: Level = cli.log_level.parse().unwrap_or(Level::INFO);
    tracing::subscriber::set_global_default(FmtSubscriber::builder().with_max_level(level).finish())?;

    let cfg = EnrichConfig::from_env();
    let fabric_cfg = FabricConfig::from_env("vigil-enrich");
    let client = FabricClient::connect(&fabric_cfg)
        .await
        .context("bus unreachable at startup")?;
    client
        .init_streams(fabric_cfg.replicas)
        .await
        .context("stream setup failed")?;

    // A missing cache degrades intel to uncached provider calls.
    let cache = match StateCache::connect(&StateConfig::from_env()).await {
        Ok(cache) => Some(cache),
        Err(err) => {
            warn!(error = %err, "state cache unavailable, intel verdicts uncached");
            None
        }
    };

    let geo = GeoProvider::open(&cfg.maxmind_db_path);
    if geo.enabled() {
        info!(path = %cfg.maxmind_db_path, "geoip database loaded");
    }
    let intel = CachingProvider::new(
        ExternalProvider::from_keys(&cfg.abuseipdb_key, &cfg.otx_key),
        cache,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = tokio::spawn(worker::run(client, geo, intel, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = worker.await;

    info!("enrichment worker stopped");
    Ok(())
}
