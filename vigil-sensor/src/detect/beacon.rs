//! C2 beacon detection keyed by (source, destination, destination port).
//!
//! Beacons phone home on a timer: near-constant inter-arrival intervals
//! with low jitter. The tracker keeps a bounded ring of recent intervals
//! per flow and scores regularity once enough of them exist.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::warn;

use vigil_core::types::{FieldMap, Severity};

use super::{ThreatKind, ThreatMatch};

/// Ring capacity for recent inter-arrival intervals.
const MAX_INTERVALS: usize = 50;
/// Minimum intervals before any scoring happens.
const MIN_INTERVALS: usize = 10;

#[derive(Debug, Clone)]
pub struct BeaconConfig {
    pub window: TimeDelta,
    /// Score at or above which a beacon match is emitted.
    pub min_score: u8,
}

impl Default for BeaconConfig {
    fn default() -> BeaconConfig {
        BeaconConfig {
            window: TimeDelta::minutes(5),
            min_score: 70,
        }
    }
}

struct Entry {
    intervals: VecDeque<f64>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    request_count: u64,
}

pub struct BeaconTracker {
    entries: HashMap<(IpAddr, IpAddr, u16), Entry>,
    cfg: BeaconConfig,
}

impl BeaconTracker {
    pub fn new(cfg: BeaconConfig) -> BeaconTracker {
        BeaconTracker { entries: HashMap::new(), cfg }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn observe(
        &mut self,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        dst_port: u16,
        protocol: &str,
        ts: DateTime<Utc>,
    ) -> Option<ThreatMatch> {
        self.evict_stale(ts);

        let entry = self.entries.entry((src_ip, dst_ip, dst_port)).or_insert_with(|| Entry {
            intervals: VecDeque::with_capacity(MAX_INTERVALS),
            first_seen: ts,
            last_seen: ts,
            request_count: 0,
        });

        // The first packet establishes the baseline; intervals start with
        // the gap between the second and third packet.
        if entry.first_seen != entry.last_seen {
            let interval = (ts - entry.last_seen).num_milliseconds() as f64 / 1000.0;
            entry.intervals.push_back(interval);
            if entry.intervals.len() > MAX_INTERVALS {
                entry.intervals.pop_front();
            }
        }
        entry.last_seen = ts;
        entry.request_count += 1;

        if entry.intervals.len() < MIN_INTERVALS {
            return None;
        }

        let (mean, std_dev) = mean_and_std(&entry.intervals);
        let jitter = if mean > 0.0 { std_dev / mean } else { 0.0 };
        let score = beacon_score(jitter, std_dev, entry.request_count);
        if score < self.cfg.min_score {
            return None;
        }

        warn!(
            src = %src_ip, dst = %dst_ip, port = dst_port, score,
            "c2 beacon pattern detected"
        );

        let mut metadata = FieldMap::new();
        metadata.insert("avg_interval_sec".into(), Value::from(mean));
        metadata.insert("std_dev_sec".into(), Value::from(std_dev));
        metadata.insert("jitter_percent".into(), Value::from(jitter * 100.0));
        metadata.insert("request_count".into(), Value::from(entry.request_count));

        Some(ThreatMatch {
            kind: ThreatKind::C2Beacon,
            severity: Severity::Critical,
            source_ip: src_ip,
            dest_ip: Some(dst_ip),
            dest_port: dst_port,
            protocol: protocol.to_string(),
            description: format!(
                "C2 beacon pattern detected: avg interval {mean:.2}s, jitter {:.1}%",
                jitter * 100.0
            ),
            score,
            metadata,
            timestamp: ts,
        })
    }

    fn evict_stale(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.cfg.window * 2;
        self.entries.retain(|_, e| e.last_seen >= cutoff);
    }
}

fn mean_and_std(intervals: &VecDeque<f64>) -> (f64, f64) {
    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    let variance = intervals.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Regularity score: low jitter and tight deviation with a sustained
/// request count are the beacon signature.
fn beacon_score(jitter: f64, std_dev: f64, requests: u64) -> u8 {
    let mut score = 0u8;
    if jitter < 0.1 {
        score += 40;
    } else if jitter < 0.2 {
        score += 30;
    } else if jitter < 0.3 {
        score += 20;
    }
    if std_dev < 0.1 {
        score += 30;
    } else if std_dev < 0.5 {
        score += 20;
    }
    if requests > 100 {
        score += 20;
    } else if requests > 50 {
        score += 10;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn at_ms(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    #[test]
    fn test_no_emission_before_ten_intervals() {
        let mut tracker = BeaconTracker::new(BeaconConfig::default());
        // 11 packets produce 9 intervals (first packet is the baseline);
        // nothing may fire yet regardless of regularity.
        for i in 0..11 {
            let m = tracker.observe(ip("10.0.0.1"), ip("203.0.113.7"), 443, "TCP", at_ms(i * 30_000));
            assert!(m.is_none(), "emitted at packet {i}");
        }
    }

    #[test]
    fn test_perfect_beacon_detected() {
        let mut tracker = BeaconTracker::new(BeaconConfig::default());
        let mut detected = None;
        // Metronome traffic every 30 s.
        for i in 0..20 {
            if let Some(m) =
                tracker.observe(ip("10.0.0.1"), ip("203.0.113.7"), 443, "TCP", at_ms(i * 30_000))
            {
                detected = Some(m);
                break;
            }
        }
        let m = detected.expect("beacon detected");
        assert_eq!(m.severity, Severity::Critical);
        assert!(m.score >= 70);
        assert_eq!(m.dest_port, 443);
    }

    #[test]
    fn test_irregular_traffic_not_flagged() {
        let mut tracker = BeaconTracker::new(BeaconConfig::default());
        // Widely varying gaps: 1s, 17s, 3s, 41s, ...
        let gaps = [1, 17, 3, 41, 7, 29, 2, 53, 11, 23, 5, 37, 13, 47, 19];
        let mut ts = 0i64;
        for gap in gaps {
            ts += gap * 1000;
            let m = tracker.observe(ip("10.0.0.2"), ip("203.0.113.8"), 8080, "TCP", at_ms(ts));
            assert!(m.is_none(), "irregular traffic flagged as beacon");
        }
    }

    #[test]
    fn test_interval_ring_is_bounded() {
        let mut tracker = BeaconTracker::new(BeaconConfig { min_score: 255, ..BeaconConfig::default() });
        for i in 0..200 {
            tracker.observe(ip("10.0.0.3"), ip("203.0.113.9"), 443, "TCP", at_ms(i * 1000));
        }
        let entry = tracker.entries.values().next().unwrap();
        assert!(entry.intervals.len() <= MAX_INTERVALS);
    }

    #[test]
    fn test_score_table() {
        assert_eq!(beacon_score(0.05, 0.05, 150), 90);
        assert_eq!(beacon_score(0.15, 0.3, 60), 60);
        assert_eq!(beacon_score(0.25, 0.3, 10), 40);
        assert_eq!(beacon_score(0.5, 2.0, 10), 0);
    }

    #[test]
    fn test_stale_flows_evicted() {
        let mut tracker = BeaconTracker::new(BeaconConfig::default());
        tracker.observe(ip("10.0.0.4"), ip("203.0.113.1"), 443, "TCP", at_ms(0));
        // 2×window = 10 min; at 11 min the idle flow is swept.
        tracker.observe(ip("10.0.0.5"), ip("203.0.113.2"), 443, "TCP", at_ms(11 * 60 * 1000));
        assert_eq!(tracker.len(), 1);
    }
}
