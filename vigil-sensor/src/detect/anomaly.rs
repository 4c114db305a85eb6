//! Packet-size anomaly observation keyed by source IP.
//!
//! Keeps a ring of recent frame sizes per source; a frame more than three
//! standard deviations above the mean counts as a burst, and repeated
//! bursts produce a match.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::warn;

use vigil_core::types::FieldMap;

use super::{severity_for_score, ThreatKind, ThreatMatch};

/// Ring capacity of recent packet sizes per source.
const MAX_SIZES: usize = 100;
/// Minimum samples before statistics mean anything.
const MIN_SAMPLES: usize = 10;
/// Bursts required before a match is emitted.
const BURST_LIMIT: u32 = 5;
/// Frames larger than an IP packet can be are malformed on their face.
const OVERSIZE_LIMIT: usize = 65_535;

#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub window: TimeDelta,
}

impl Default for AnomalyConfig {
    fn default() -> AnomalyConfig {
        AnomalyConfig { window: TimeDelta::minutes(1) }
    }
}

struct Entry {
    sizes: VecDeque<usize>,
    burst_count: u32,
    total_packets: u64,
    last_seen: DateTime<Utc>,
}

pub struct AnomalyTracker {
    entries: HashMap<IpAddr, Entry>,
    cfg: AnomalyConfig,
}

impl AnomalyTracker {
    pub fn new(cfg: AnomalyConfig) -> AnomalyTracker {
        AnomalyTracker { entries: HashMap::new(), cfg }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn observe(&mut self, src_ip: IpAddr, frame_len: usize, ts: DateTime<Utc>) -> Option<ThreatMatch> {
        self.evict_stale(ts);

        let entry = self.entries.entry(src_ip).or_insert_with(|| Entry {
            sizes: VecDeque::with_capacity(MAX_SIZES),
            burst_count: 0,
            total_packets: 0,
            last_seen: ts,
        });
        entry.sizes.push_back(frame_len);
        if entry.sizes.len() > MAX_SIZES {
            entry.sizes.pop_front();
        }
        entry.total_packets += 1;
        entry.last_seen = ts;

        if frame_len > OVERSIZE_LIMIT {
            warn!(ip = %src_ip, size = frame_len, "oversized frame");
            return Some(self.matched(src_ip, 90, "Oversized frame observed", frame_len, ts));
        }

        if entry.sizes.len() < MIN_SAMPLES {
            return None;
        }

        let n = entry.sizes.len() as f64;
        let mean = entry.sizes.iter().map(|&s| s as f64).sum::<f64>() / n;
        let variance = entry.sizes.iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        if (frame_len as f64) > mean + 3.0 * std_dev {
            entry.burst_count += 1;
            if entry.burst_count > BURST_LIMIT {
                entry.burst_count = 0;
                return Some(self.matched(
                    src_ip,
                    80,
                    "Repeated packet-size bursts observed",
                    frame_len,
                    ts,
                ));
            }
        }

        None
    }

    fn matched(
        &self,
        src_ip: IpAddr,
        score: u8,
        description: &str,
        frame_len: usize,
        ts: DateTime<Utc>,
    ) -> ThreatMatch {
        let mut metadata = FieldMap::new();
        metadata.insert("frame_len".into(), Value::from(frame_len as u64));

        ThreatMatch {
            kind: ThreatKind::Anomaly,
            severity: severity_for_score(score),
            source_ip: src_ip,
            dest_ip: None,
            dest_port: 0,
            protocol: String::new(),
            description: description.to_string(),
            score,
            metadata,
            timestamp: ts,
        }
    }

    fn evict_stale(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.cfg.window * 2;
        self.entries.retain(|_, e| e.last_seen >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::Severity;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_uniform_traffic_quiet() {
        let mut tracker = AnomalyTracker::new(AnomalyConfig::default());
        for i in 0..100 {
            assert!(tracker.observe(ip("10.0.0.1"), 500, at(i)).is_none());
        }
    }

    #[test]
    fn test_bursts_trip_after_limit() {
        let mut tracker = AnomalyTracker::new(AnomalyConfig::default());
        // Baseline with slight variation so sigma is nonzero but small.
        for i in 0..50 {
            tracker.observe(ip("10.0.0.2"), 500 + (i as usize % 5), at(i));
        }
        // Giant frames: burst 1..=5 silent, burst 6 fires.
        let mut fired = 0;
        for i in 0..6 {
            if tracker.observe(ip("10.0.0.2"), 9000, at(50 + i)).is_some() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_oversized_frame_immediate() {
        let mut tracker = AnomalyTracker::new(AnomalyConfig::default());
        let m = tracker.observe(ip("10.0.0.3"), 70_000, at(0)).unwrap();
        assert_eq!(m.kind, ThreatKind::Anomaly);
        assert_eq!(m.score, 90);
        assert_eq!(m.severity, Severity::Critical);
    }

    #[test]
    fn test_ring_is_bounded() {
        let mut tracker = AnomalyTracker::new(AnomalyConfig::default());
        for i in 0..500 {
            tracker.observe(ip("10.0.0.4"), 500, at(i / 10));
        }
        assert!(tracker.entries.values().next().unwrap().sizes.len() <= MAX_SIZES);
    }

    #[test]
    fn test_stale_sources_evicted() {
        let mut tracker = AnomalyTracker::new(AnomalyConfig::default());
        tracker.observe(ip("10.0.0.5"), 500, at(0));
        // 2×window = 2 min.
        tracker.observe(ip("10.0.0.6"), 500, at(121));
        assert_eq!(tracker.len(), 1);
    }
}
