//! Stateful behavioural threat detection.
//!
//! Four trackers keyed by flow tuple or source IP: port scan, C2 beacon,
//! data exfiltration, and packet anomaly. Each tracker owns its entries
//! behind its own mutex — there is no cross-tracker ordering — and evicts
//! entries lazily during insertion once they are stale beyond twice the
//! tracker window.

mod anomaly;
mod beacon;
mod exfil;
mod port_scan;

pub use anomaly::{AnomalyConfig, AnomalyTracker};
pub use beacon::{BeaconConfig, BeaconTracker};
pub use exfil::{ExfilConfig, ExfilTracker};
pub use port_scan::{PortScanConfig, PortScanTracker, Sensitivity};

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use vigil_core::types::{Event, FieldMap, Severity};

// ── Threat matches ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    PortScan,
    C2Beacon,
    Exfiltration,
    Anomaly,
}

impl ThreatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreatKind::PortScan => "port_scan",
            ThreatKind::C2Beacon => "c2_beacon",
            ThreatKind::Exfiltration => "exfiltration",
            ThreatKind::Anomaly => "anomaly",
        }
    }
}

/// A detected threat, ready to become a canonical event.
#[derive(Debug, Clone)]
pub struct ThreatMatch {
    pub kind: ThreatKind,
    pub severity: Severity,
    pub source_ip: IpAddr,
    pub dest_ip: Option<IpAddr>,
    pub dest_port: u16,
    pub protocol: String,
    pub description: String,
    /// 0..=100 confidence score.
    pub score: u8,
    pub metadata: FieldMap,
    pub timestamp: DateTime<Utc>,
}

impl ThreatMatch {
    pub fn into_event(self) -> Event {
        let mut evt = Event::new("sensor", self.kind.as_str(), self.severity);
        evt.timestamp = self.timestamp;
        evt.source_ip = self.source_ip.to_string();
        if let Some(dst) = self.dest_ip {
            evt.dest_ip = dst.to_string();
        }
        evt.dest_port = self.dest_port;
        evt.description = self.description;
        evt.metadata = self.metadata;
        evt.metadata.insert("score".into(), serde_json::Value::from(self.score));
        if !self.protocol.is_empty() {
            evt.metadata.insert("protocol".into(), serde_json::Value::from(self.protocol));
        }
        evt.add_tag("threat");
        evt
    }
}

// ── Detector ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub port_scan: PortScanConfig,
    pub beacon: BeaconConfig,
    pub exfil: ExfilConfig,
    pub anomaly: AnomalyConfig,
}

impl Default for DetectorConfig {
    fn default() -> DetectorConfig {
        DetectorConfig {
            port_scan: PortScanConfig::default(),
            beacon: BeaconConfig::default(),
            exfil: ExfilConfig::default(),
            anomaly: AnomalyConfig::default(),
        }
    }
}

impl DetectorConfig {
    pub fn from_env() -> DetectorConfig {
        use vigil_core::config::{env_or, env_parse};
        let mut cfg = DetectorConfig::default();
        cfg.port_scan.threshold = env_parse("SENSOR_PORTSCAN_THRESHOLD", cfg.port_scan.threshold);
        cfg.port_scan.sensitivity = env_or("SENSOR_PORTSCAN_SENSITIVITY", "medium")
            .parse()
            .unwrap_or(Sensitivity::Medium);
        cfg.beacon.min_score = env_parse("SENSOR_BEACON_MIN_SCORE", cfg.beacon.min_score);
        cfg.exfil.rate_threshold = env_parse("SENSOR_EXFIL_RATE_BPS", cfg.exfil.rate_threshold);
        cfg.exfil.volume_threshold = env_parse("SENSOR_EXFIL_VOLUME_BYTES", cfg.exfil.volume_threshold);
        cfg
    }
}

/// Statistics snapshot for operational logging.
#[derive(Debug, Clone, Default)]
pub struct ThreatStats {
    pub total: u64,
    pub port_scans: u64,
    pub beacons: u64,
    pub exfiltrations: u64,
    pub anomalies: u64,
}

/// Runs in the inspector workers after parsing; per-tracker mutexes keep
/// the four trackers independent under concurrency.
pub struct ThreatDetector {
    port_scan: Mutex<PortScanTracker>,
    beacon: Mutex<BeaconTracker>,
    exfil: Mutex<ExfilTracker>,
    anomaly: Mutex<AnomalyTracker>,
    total: AtomicU64,
    port_scans: AtomicU64,
    beacons: AtomicU64,
    exfiltrations: AtomicU64,
    anomalies: AtomicU64,
}

impl ThreatDetector {
    pub fn new(cfg: DetectorConfig) -> ThreatDetector {
        ThreatDetector {
            port_scan: Mutex::new(PortScanTracker::new(cfg.port_scan)),
            beacon: Mutex::new(BeaconTracker::new(cfg.beacon)),
            exfil: Mutex::new(ExfilTracker::new(cfg.exfil)),
            anomaly: Mutex::new(AnomalyTracker::new(cfg.anomaly)),
            total: AtomicU64::new(0),
            port_scans: AtomicU64::new(0),
            beacons: AtomicU64::new(0),
            exfiltrations: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
        }
    }

    /// Observe one decoded packet. `payload_len` is the application payload
    /// size (exfiltration accounting), `frame_len` the wire size (anomaly).
    #[allow(clippy::too_many_arguments)]
    pub fn observe(
        &self,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        dst_port: u16,
        protocol: &str,
        payload_len: usize,
        frame_len: usize,
        ts: DateTime<Utc>,
    ) -> Vec<ThreatMatch> {
        let mut matches = Vec::new();

        if let Some(m) = self.anomaly.lock().observe(src_ip, frame_len, ts) {
            matches.push(m);
        }
        if dst_port > 0 {
            if let Some(m) = self.port_scan.lock().observe(src_ip, dst_port, ts) {
                matches.push(m);
            }
        }
        if let Some(m) = self.beacon.lock().observe(src_ip, dst_ip, dst_port, protocol, ts) {
            matches.push(m);
        }
        if payload_len > 0 {
            if let Some(m) =
                self.exfil.lock().observe(src_ip, dst_ip, dst_port, protocol, payload_len as u64, ts)
            {
                matches.push(m);
            }
        }

        for m in &matches {
            self.total.fetch_add(1, Ordering::Relaxed);
            let counter = match m.kind {
                ThreatKind::PortScan => &self.port_scans,
                ThreatKind::C2Beacon => &self.beacons,
                ThreatKind::Exfiltration => &self.exfiltrations,
                ThreatKind::Anomaly => &self.anomalies,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }

        matches
    }

    pub fn stats(&self) -> ThreatStats {
        ThreatStats {
            total: self.total.load(Ordering::Relaxed),
            port_scans: self.port_scans.load(Ordering::Relaxed),
            beacons: self.beacons.load(Ordering::Relaxed),
            exfiltrations: self.exfiltrations.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
        }
    }

    /// Active tracker entry counts `(port_scan, beacon, exfil, anomaly)`.
    pub fn tracker_sizes(&self) -> (usize, usize, usize, usize) {
        (
            self.port_scan.lock().len(),
            self.beacon.lock().len(),
            self.exfil.lock().len(),
            self.anomaly.lock().len(),
        )
    }
}

/// Map a confidence score onto the severity bands used by the anomaly
/// tracker; the other trackers carry fixed severities.
pub(crate) fn severity_for_score(score: u8) -> Severity {
    Severity::from_score(score)
}
