use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vigil_correlate::config::CorrelateConfig;
use vigil_correlate::engine::Engine;
use vigil_correlate::{rules, worker};
use vigil_fabric::{FabricClient, FabricConfig};
use vigil_state::{StateCache, StateConfig};

#[derive(Parser, Debug)]
#[command(name = "vigil-correlate", version, about = "Vigil correlation engine")]
struct Cli {
    /// Rules file (overrides CORRELATION_RULES_PATH)
    #[arg(short, long)]
    rules: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level: Level = cli.log_level.parse().unwrap_or(Level::INFO);
    tracing::subscriber::set_global_default(FmtSubscriber::builder().with_max_level(level).finish())?;

    let mut cfg = CorrelateConfig::from_env();
    if let Some(path) = cli.rules {
        cfg.rules_path = path;
    }

    let fabric_cfg = FabricConfig::from_env("vigil-correlate");
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
            warn!(error = %err, "state cache unavailable, stateful rules fire unconditionally");
            None
        }
    };

    let engine = Arc::new(Engine::new());
    let set = engine.load(rules::load(&cfg.rules_path));
    info!(rules = set.rules.len(), skipped = set.skipped, "rule set compiled");

    // Reload on rules-file change; the compiled set swaps atomically.
    if !cfg.rules_path.is_empty() {
        let engine = Arc::clone(&engine);
        let path = cfg.rules_path.clone();
        let interval = cfg.reload_interval;
        tokio::spawn(async move {
            let mut last = rules::modified_at(&path);
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let current = rules::modified_at(&path);
                if current != last {
                    last = current;
                    let set = engine.load(rules::load(&path));
                    info!(rules = set.rules.len(), skipped = set.skipped, "rule set reloaded");
                }
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = tokio::spawn(worker::run(client, engine, cache, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = worker.await;

    info!("correlation engine stopped");
    Ok(())
}
