use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vigil_fabric::{FabricClient, FabricConfig};
use vigil_soar::actions::ActionRegistry;
use vigil_soar::config::SoarConfig;
use vigil_soar::engine::Orchestrator;
use vigil_soar::{playbooks, worker};
use vigil_state::{StateCache, StateConfig};

#[derive(Parser, Debug)]
#[command(name = "vigil-soar", version, about = "Vigil SOAR orchestrator")]
struct Cli {
    /// Playbooks file (overrides SOAR_PLAYBOOKS_PATH)
    #[arg(short, long)]
    playbooks: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level: Level = cli.log_level.parse().unwrap_or(Level::INFO);
    tracing::subscriber::set_global_default(FmtSubscriber::builder().with_max_level(level).finish())?;

    let mut cfg = SoarConfig::from_env();
    if let Some(path) = cli.playbooks {
        cfg.playbooks_path = path;
    }

    let fabric_cfg = FabricConfig::from_env("vigil-soar");
    let client = FabricClient::connect(&fabric_cfg)
        .await
        .context("bus unreachable at startup")?;
    client
        .init_streams(fabric_cfg.replicas)
        .await
        .context("stream setup failed")?;

    let cache = match StateCache::connect(&StateConfig::from_env()).await {
        Ok(cache) => Some(cache),
        Err(err) => {
            warn!(error = %err, "state cache unavailable, alert targets unresolvable");
            None
        }
    };

    let registry = Arc::new(ActionRegistry::with_core_actions(&cfg.slack_webhook));
    let orchestrator = Arc::new(Orchestrator::new(
        playbooks::load(&cfg.playbooks_path),
        registry,
        cache,
    ));
    info!(active = orchestrator.active_playbooks(), "playbooks loaded");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = tokio::spawn(worker::run(client, orchestrator, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = worker.await;

    info!("soar orchestrator stopped");
    Ok(())
}
