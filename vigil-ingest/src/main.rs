use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vigil_fabric::{EventProducer, FabricClient, FabricConfig, ProducerConfig};
use vigil_ingest::config::IngestConfig;
use vigil_ingest::http::{router, AppState};
use vigil_ingest::{syslog, FabricPublisher};

#[derive(Parser, Debug)]
#[command(name = "vigil-ingest", version, about = "Vigil ingest gateway")]
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

    let cfg = IngestConfig::from_env();
    let fabric_cfg = FabricConfig::from_env("vigil-ingest");
    let client = FabricClient::connect(&fabric_cfg)
        .await
        .context("bus unreachable at startup")?;
    client
        .init_streams(fabric_cfg.replicas)
        .await
        .context("stream setup failed")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (producer, producer_handle) =
        EventProducer::start(client.clone(), ProducerConfig::default(), shutdown_rx.clone());

    let publisher = Arc::new(FabricPublisher { producer, client });
    let state = Arc::new(AppState { publisher: publisher.clone() });
    let app = router(state, cfg.max_body_bytes);

    if cfg.syslog_enabled {
        match tokio::net::UdpSocket::bind(("0.0.0.0", cfg.syslog_port)).await {
            Ok(socket) => {
                tokio::spawn(syslog::run_udp(socket, publisher.clone(), shutdown_rx.clone()));
            }
            Err(err) => warn!(error = %err, port = cfg.syslog_port, "syslog udp bind failed"),
        }
        match tokio::net::TcpListener::bind(("0.0.0.0", cfg.syslog_port)).await {
            Ok(listener) => {
                tokio::spawn(syslog::run_tcp(listener, publisher.clone(), shutdown_rx.clone()));
            }
            Err(err) => warn!(error = %err, port = cfg.syslog_port, "syslog tcp bind failed"),
        }
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.http_port))
        .await
        .with_context(|| format!("http bind failed on port {}", cfg.http_port))?;
    info!(port = cfg.http_port, "ingest gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(
        Duration::from_secs(vigil_core::SHUTDOWN_GRACE_SECS),
        producer_handle,
    )
    .await;

    info!("ingest gateway stopped");
    Ok(())
}
