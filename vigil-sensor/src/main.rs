use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vigil_core::ids::now_utc_ms;
use vigil_fabric::{EventProducer, FabricClient, FabricConfig, ProducerConfig};
use vigil_sensor::capture::{self, CaptureBackend};
use vigil_sensor::config::SensorConfig;
use vigil_sensor::detect::ThreatDetector;
use vigil_sensor::inspector::{EventSink, PacketInspector};

#[derive(Parser, Debug)]
#[command(name = "vigil-sensor", version, about = "Vigil network sensor")]
struct Cli {
    /// Interfaces to capture on (overrides SENSOR_INTERFACE)
    #[arg(short, long)]
    interface: Vec<String>,

    /// Worker pool size (0 = one per CPU)
    #[arg(short, long, default_value_t = 0)]
    workers: usize,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let mut cfg = SensorConfig::from_env();
    if !cli.interface.is_empty() {
        cfg.interfaces = cli.interface.clone();
    }
    if cli.workers > 0 {
        cfg.workers = cli.workers;
    }
    if cfg.interfaces.is_empty() {
        let iface = capture::default_interface().context("no capture interface available")?;
        info!(iface, "using default capture interface");
        cfg.interfaces = vec![iface];
    }

    let fabric_cfg = FabricConfig::from_env("vigil-sensor");
    let client = FabricClient::connect(&fabric_cfg)
        .await
        .context("bus unreachable at startup")?;
    client
        .init_streams(fabric_cfg.replicas)
        .await
        .context("stream setup failed")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (producer, producer_handle) =
        EventProducer::start(client, ProducerConfig::default(), shutdown_rx);

    let detector = Arc::new(ThreatDetector::new(cfg.detect.clone()));
    let sink: EventSink = {
        let producer = producer.clone();
        Arc::new(move |event| {
            // Queue full: the producer counted the drop; capture goes on.
            let _ = producer.try_publish(event);
        })
    };
    let inspector = Arc::new(PacketInspector::start(
        cfg.worker_count(),
        cfg.dpi.clone(),
        Arc::clone(&detector),
        sink,
    ));
    info!(workers = cfg.worker_count(), interfaces = ?cfg.interfaces, "sensor started");

    let running = Arc::new(AtomicBool::new(true));
    let mut capture_threads = Vec::new();
    for iface in &cfg.interfaces {
        let iface = iface.clone();
        let cfg = cfg.clone();
        let inspector = Arc::clone(&inspector);
        let running = Arc::clone(&running);
        capture_threads.push(std::thread::Builder::new().name(format!("capture-{iface}")).spawn(
            move || capture_loop(&cfg, &iface, inspector, running),
        )?);
    }

    // Operational heartbeat.
    let stats_inspector = Arc::clone(&inspector);
    let stats_detector = Arc::clone(&detector);
    let stats_producer = producer.clone();
    let stats_running = Arc::clone(&running);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            if !stats_running.load(Ordering::Relaxed) {
                return;
            }
            let istats = stats_inspector.stats();
            let tstats = stats_detector.stats();
            let pstats = stats_producer.metrics();
            info!(
                processed = istats.processed,
                dropped = istats.dropped,
                threats = tstats.total,
                published = pstats.published,
                publish_dropped = pstats.dropped,
                "sensor stats"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    running.store(false, Ordering::Relaxed);
    let _ = shutdown_tx.send(true);

    for handle in capture_threads {
        let _ = handle.join();
    }
    if let Ok(inspector) = Arc::try_unwrap(inspector) {
        inspector.stop();
    }
    let _ = tokio::time::timeout(
        Duration::from_secs(vigil_core::SHUTDOWN_GRACE_SECS),
        producer_handle,
    )
    .await;

    info!("sensor stopped");
    Ok(())
}

fn capture_loop(
    cfg: &SensorConfig,
    iface: &str,
    inspector: Arc<PacketInspector>,
    running: Arc<AtomicBool>,
) {
    let mut backend: Box<dyn CaptureBackend> = match capture::open_backend(cfg, iface) {
        Ok(backend) => backend,
        Err(err) => {
            error!(iface, error = %err, "capture open failed");
            return;
        }
    };
    info!(iface, "capture loop running");

    let iface_label: Arc<str> = Arc::from(iface);
    let mut consecutive_errors = 0u32;
    while running.load(Ordering::Relaxed) {
        let ts = now_utc_ms();
        match backend.poll(&mut |frame| inspector.submit(frame, &iface_label, ts)) {
            Ok(_) => consecutive_errors = 0,
            Err(err) => {
                consecutive_errors += 1;
                warn!(iface, error = %err, "capture read error");
                if consecutive_errors > 10 {
                    error!(iface, "too many capture errors, stopping loop");
                    return;
                }
                std::thread::sleep(Duration::from_millis(200));
            }
        }
    }

    if let Ok(stats) = backend.stats() {
        info!(iface, received = stats.received, dropped = stats.dropped, "capture stats");
    }
}

fn init_logging(level: &str) -> Result<()> {
    let level: Level = level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
