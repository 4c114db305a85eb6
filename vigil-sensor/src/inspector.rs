//! Worker-pool packet inspection.
//!
//! Capture loops submit raw frames with a non-blocking send; a full queue
//! drops the frame and bumps the dropped counter — that is the
//! backpressure policy, chosen so capture never stalls. Workers decode,
//! run DPI and the threat trackers, and hand resulting events to the sink
//! (again non-blocking; the sink counts its own drops).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use vigil_core::types::Event;

use crate::decode;
use crate::detect::ThreatDetector;
use crate::dpi::{self, DpiConfig};
use crate::event::{preview, NetworkEvent, NetworkEventKind};

/// Queue depth between capture loops and the worker pool.
const JOB_QUEUE_DEPTH: usize = 10_000;

/// Destination for canonical events; must never block.
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

struct PacketJob {
    data: Vec<u8>,
    iface: Arc<str>,
    ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct InspectorStats {
    pub processed: u64,
    pub dropped: u64,
    pub bytes: u64,
    pub protocols: HashMap<String, u64>,
    pub threats: HashMap<String, u64>,
}

#[derive(Default)]
struct SharedStats {
    processed: AtomicU64,
    dropped: AtomicU64,
    bytes: AtomicU64,
    protocols: Mutex<HashMap<String, u64>>,
    threats: Mutex<HashMap<String, u64>>,
}

pub struct PacketInspector {
    tx: SyncSender<PacketJob>,
    stats: Arc<SharedStats>,
    workers: Vec<JoinHandle<()>>,
}

impl PacketInspector {
    /// Spawn `workers` inspection threads.
    pub fn start(
        workers: usize,
        dpi_cfg: DpiConfig,
        detector: Arc<ThreatDetector>,
        sink: EventSink,
    ) -> PacketInspector {
        let (tx, rx) = sync_channel::<PacketJob>(JOB_QUEUE_DEPTH);
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(SharedStats::default());

        let handles = (0..workers.max(1))
            .map(|i| {
                let rx = Arc::clone(&rx);
                let stats = Arc::clone(&stats);
                let detector = Arc::clone(&detector);
                let sink = Arc::clone(&sink);
                let dpi_cfg = dpi_cfg.clone();
                std::thread::Builder::new()
                    .name(format!("inspect-{i}"))
                    .spawn(move || worker_loop(rx, stats, detector, sink, dpi_cfg))
                    .expect("spawn inspector worker")
            })
            .collect();

        PacketInspector { tx, stats, workers: handles }
    }

    /// Non-blocking submission from a capture loop.
    pub fn submit(&self, data: &[u8], iface: &Arc<str>, ts: DateTime<Utc>) {
        let job = PacketJob {
            data: data.to_vec(),
            iface: Arc::clone(iface),
            ts,
        };
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> InspectorStats {
        InspectorStats {
            processed: self.stats.processed.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            bytes: self.stats.bytes.load(Ordering::Relaxed),
            protocols: self.stats.protocols.lock().clone(),
            threats: self.stats.threats.lock().clone(),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Close the queue and join the workers; in-flight jobs finish.
    pub fn stop(self) {
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    rx: Arc<Mutex<Receiver<PacketJob>>>,
    stats: Arc<SharedStats>,
    detector: Arc<ThreatDetector>,
    sink: EventSink,
    dpi_cfg: DpiConfig,
) {
    loop {
        let job = {
            let guard = rx.lock();
            guard.recv()
        };
        let Ok(job) = job else {
            debug!("inspector worker exiting");
            return;
        };
        inspect_one(&job, &stats, &detector, &sink, &dpi_cfg);
    }
}

fn inspect_one(
    job: &PacketJob,
    stats: &SharedStats,
    detector: &ThreatDetector,
    sink: &EventSink,
    dpi_cfg: &DpiConfig,
) {
    stats.processed.fetch_add(1, Ordering::Relaxed);
    stats.bytes.fetch_add(job.data.len() as u64, Ordering::Relaxed);

    // Parse failures are silent: not every frame is IP, and malformed
    // packets must not cost more than the decode attempt.
    let Some(view) = decode::decode(&job.data) else {
        return;
    };

    let mut events = Vec::with_capacity(2);

    let flow = NetworkEvent {
        timestamp: job.ts,
        interface: job.iface.to_string(),
        kind: NetworkEventKind::Flow,
        protocol: view.transport.to_string(),
        severity: vigil_core::Severity::Info,
        source_ip: view.src_ip.to_string(),
        dest_ip: view.dst_ip.to_string(),
        source_port: view.src_port,
        dest_port: view.dst_port,
        transport: view.transport.to_string(),
        tcp_flags: view.tcp.map(|t| t.flags_string()).unwrap_or_default(),
        sequence: view.tcp.map(|t| t.sequence).unwrap_or(0),
        acknowledgment: view.tcp.map(|t| t.acknowledgment).unwrap_or(0),
        window_size: view.tcp.map(|t| t.window_size).unwrap_or(0),
        payload_size: view.payload.len(),
        application: Default::default(),
        payload_preview: String::new(),
    };

    if let Some(obs) = dpi::inspect(dpi_cfg, view.dst_port, view.payload) {
        let mut app = flow.clone();
        app.kind = NetworkEventKind::Application;
        app.protocol = obs.protocol.to_string();
        app.application = obs.fields;
        app.payload_preview = preview(view.payload);
        events.push(app);
    }
    events.push(flow);

    let threats = detector.observe(
        view.src_ip,
        view.dst_ip,
        view.dst_port,
        view.transport,
        view.payload.len(),
        view.frame_len,
        job.ts,
    );

    {
        let mut protocols = stats.protocols.lock();
        for evt in &events {
            *protocols.entry(evt.protocol.clone()).or_insert(0) += 1;
        }
    }
    if !threats.is_empty() {
        let mut threat_stats = stats.threats.lock();
        for t in &threats {
            *threat_stats.entry(t.kind.as_str().to_string()).or_insert(0) += 1;
        }
    }

    for evt in events {
        sink(evt.into_event());
    }
    for threat in threats {
        sink(threat.into_event());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testutil::tcp_frame;
    use crate::detect::DetectorConfig;
    use crate::dpi::tls::testutil::client_hello_with_sni;
    use parking_lot::Mutex as PlMutex;
    use vigil_core::ids::now_utc_ms;

    fn collecting_sink() -> (EventSink, Arc<PlMutex<Vec<Event>>>) {
        let collected = Arc::new(PlMutex::new(Vec::new()));
        let inner = Arc::clone(&collected);
        let sink: EventSink = Arc::new(move |evt| inner.lock().push(evt));
        (sink, collected)
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_tls_frame_produces_sni_event() {
        let (sink, collected) = collecting_sink();
        let detector = Arc::new(ThreatDetector::new(DetectorConfig::default()));
        let inspector = PacketInspector::start(2, DpiConfig::default(), detector, sink);

        let hello = client_hello_with_sni(b"example.com");
        let frame = tcp_frame([10, 0, 0, 1], [93, 184, 216, 34], 50000, 443, &hello);
        let iface: Arc<str> = Arc::from("eth0");
        inspector.submit(&frame, &iface, now_utc_ms());

        wait_for(|| collected.lock().iter().any(|e| e.event_type == "network.tls"));
        inspector.stop();

        let events = collected.lock();
        let tls = events.iter().find(|e| e.event_type == "network.tls").unwrap();
        let app = tls.metadata.get("application").unwrap();
        assert_eq!(app.get("sni").unwrap(), "example.com");
        assert!(events.iter().any(|e| e.event_type == "network.flow"));
    }

    #[test]
    fn test_non_ip_frames_counted_not_crashing() {
        let (sink, collected) = collecting_sink();
        let detector = Arc::new(ThreatDetector::new(DetectorConfig::default()));
        let inspector = PacketInspector::start(1, DpiConfig::default(), detector, sink);

        let iface: Arc<str> = Arc::from("eth0");
        inspector.submit(&[0u8; 24], &iface, now_utc_ms());
        wait_for(|| inspector.stats().processed >= 1);
        inspector.stop();
        assert!(collected.lock().is_empty());
    }

    #[test]
    fn test_port_scan_surfaces_threat_event() {
        let (sink, collected) = collecting_sink();
        let detector = Arc::new(ThreatDetector::new(DetectorConfig::default()));
        let inspector = PacketInspector::start(1, DpiConfig::default(), detector, sink);

        let iface: Arc<str> = Arc::from("eth0");
        let ts = now_utc_ms();
        for port in 0u16..150 {
            let frame = tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 40000, 1000 + port, b"");
            inspector.submit(&frame, &iface, ts);
        }
        wait_for(|| inspector.stats().processed >= 150);
        inspector.stop();

        let events = collected.lock();
        let scans: Vec<_> = events.iter().filter(|e| e.event_type == "port_scan").collect();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].severity, vigil_core::Severity::High);
    }
}
