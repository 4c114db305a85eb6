use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vigil_agent::collectors::CollectorManager;
use vigil_agent::commands::{self, CommandHandler};
use vigil_agent::config::AgentConfig;
use vigil_fabric::{EventProducer, FabricClient, FabricConfig, ProducerConfig};
use vigil_transport::{TlsContext, TlsPaths};

#[derive(Parser, Debug)]
#[command(name = "vigil-agent", version, about = "Vigil endpoint agent")]
struct Cli {
    /// Agent identity (overrides AGENT_ID)
    #[arg(short, long)]
    agent_id: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level: Level = cli.log_level.parse().unwrap_or(Level::INFO);
    tracing::subscriber::set_global_default(FmtSubscriber::builder().with_max_level(level).finish())?;

    let mut cfg = AgentConfig::from_env();
    if let Some(id) = cli.agent_id {
        cfg.agent_id = id;
    }
    info!(agent_id = %cfg.agent_id, server = %cfg.server_url, "agent starting");

    // The certificate triplet doubles as the rotation-watched identity.
    let tls_paths = TlsPaths::from_env();
    if let Some(paths) = &tls_paths {
        let tls = TlsContext::load(paths.clone()).context("certificate material unreadable")?;
        info!(identity = %tls.identity(), "mutual TLS identity loaded");
        tls.spawn_rotation(Duration::from_secs(3600), chrono::Duration::days(14));
    }

    let mut fabric_cfg = FabricConfig::from_env(&format!("vigil-agent-{}", cfg.agent_id));
    fabric_cfg.url = cfg.server_url.clone();
    fabric_cfg.tls = tls_paths;
    let client = FabricClient::connect(&fabric_cfg)
        .await
        .context("bus unreachable at startup")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (producer, producer_handle) =
        EventProducer::start(client.clone(), ProducerConfig::default(), shutdown_rx.clone());

    let manager = CollectorManager::start(&cfg, producer.clone(), shutdown_rx.clone());

    let handler = Arc::new(CommandHandler::new(cfg.clone(), producer.clone()));
    let listener = tokio::spawn(commands::run_listener(
        client,
        handler,
        cfg.agent_id.clone(),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    manager.join().await;
    let _ = listener.await;
    let _ = tokio::time::timeout(
        Duration::from_secs(vigil_core::SHUTDOWN_GRACE_SECS),
        producer_handle,
    )
    .await;

    info!("agent stopped");
    Ok(())
}
