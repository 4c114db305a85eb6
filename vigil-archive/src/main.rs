use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vigil_archive::config::ArchiveConfig;
use vigil_archive::sink::ArchiveSink;
use vigil_archive::worker;
use vigil_fabric::{FabricClient, FabricConfig};

#[derive(Parser, Debug)]
#[command(name = "vigil-archive", version, about = "Vigil archival sink")]
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

    let cfg = ArchiveConfig::from_env();
    let fabric_cfg = FabricConfig::from_env("vigil-archive");
    let client = FabricClient::connect(&fabric_cfg)
        .await
        .context("bus unreachable at startup")?;
    client
        .init_streams(fabric_cfg.replicas)
        .await
        .context("stream setup failed")?;

    let sink = ArchiveSink::connect(&cfg);
    sink.ping().await.context("columnar store unreachable at startup")?;
    sink.init_schema().await.context("schema setup failed")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = tokio::spawn(worker::run(
        client,
        sink,
        cfg.batch_size,
        cfg.flush_interval,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = worker.await;

    info!("archival sink stopped");
    Ok(())
}
