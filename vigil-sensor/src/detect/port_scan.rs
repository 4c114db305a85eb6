//! Port scan tracking keyed by source IP.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::warn;

use vigil_core::types::{FieldMap, Severity};

use super::{ThreatKind, ThreatMatch};

/// Scan sensitivity scales the fixed port threshold: `low` tolerates twice
/// as many ports, `high` half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    Low,
    Medium,
    High,
}

impl Sensitivity {
    pub fn multiplier(self) -> f64 {
        match self {
            Sensitivity::Low => 2.0,
            Sensitivity::Medium => 1.0,
            Sensitivity::High => 0.5,
        }
    }
}

impl FromStr for Sensitivity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Sensitivity::Low),
            "medium" => Ok(Sensitivity::Medium),
            "high" => Ok(Sensitivity::High),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortScanConfig {
    pub window: TimeDelta,
    /// Base unique-port threshold before the sensitivity multiplier.
    pub threshold: usize,
    pub sensitivity: Sensitivity,
}

impl Default for PortScanConfig {
    fn default() -> PortScanConfig {
        PortScanConfig {
            window: TimeDelta::seconds(60),
            threshold: 20,
            sensitivity: Sensitivity::Medium,
        }
    }
}

struct Entry {
    ports: HashSet<u16>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    packets: u64,
    /// When set, suppresses re-reporting the same sweep until a full
    /// window has elapsed.
    reported_at: Option<DateTime<Utc>>,
}

pub struct PortScanTracker {
    entries: HashMap<IpAddr, Entry>,
    cfg: PortScanConfig,
}

impl PortScanTracker {
    pub fn new(cfg: PortScanConfig) -> PortScanTracker {
        PortScanTracker { entries: HashMap::new(), cfg }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn observe(&mut self, src_ip: IpAddr, dst_port: u16, ts: DateTime<Utc>) -> Option<ThreatMatch> {
        self.evict_stale(ts);

        let entry = self.entries.entry(src_ip).or_insert_with(|| Entry {
            ports: HashSet::new(),
            first_seen: ts,
            last_seen: ts,
            packets: 0,
            reported_at: None,
        });
        entry.ports.insert(dst_port);
        entry.last_seen = ts;
        entry.packets += 1;

        let effective = self.cfg.threshold as f64 * self.cfg.sensitivity.multiplier();
        if (entry.ports.len() as f64) <= effective {
            return None;
        }
        if let Some(reported) = entry.reported_at {
            if ts - reported < self.cfg.window {
                return None;
            }
        }

        let unique = entry.ports.len();
        let elapsed = (entry.last_seen - entry.first_seen).num_milliseconds() as f64 / 1000.0;
        let ports_per_sec = unique as f64 / (elapsed + 1.0);
        let score = (unique as f64 * 2.0 + ports_per_sec * 10.0).min(100.0) as u8;

        entry.reported_at = Some(ts);
        warn!(ip = %src_ip, unique_ports = unique, "port scan detected");

        let mut metadata = FieldMap::new();
        metadata.insert("unique_ports".into(), Value::from(unique as u64));
        metadata.insert("duration_sec".into(), Value::from(elapsed));
        metadata.insert("packets".into(), Value::from(entry.packets));

        Some(ThreatMatch {
            kind: ThreatKind::PortScan,
            severity: Severity::High,
            source_ip: src_ip,
            dest_ip: None,
            dest_port: 0,
            protocol: String::new(),
            description: format!("Port scan detected: {unique} unique ports in {elapsed:.1} seconds"),
            score,
            metadata,
            timestamp: ts,
        })
    }

    /// Entries idle past 2×window are dropped during insertion.
    fn evict_stale(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.cfg.window * 2;
        self.entries.retain(|_, e| e.last_seen >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_below_threshold_is_silent() {
        let mut tracker = PortScanTracker::new(PortScanConfig::default());
        for port in 0..20 {
            assert!(tracker.observe(ip("10.0.0.1"), 1000 + port, at(0)).is_none());
        }
    }

    #[test]
    fn test_emits_once_over_threshold() {
        let mut tracker = PortScanTracker::new(PortScanConfig::default());
        let mut matches = 0;
        for port in 0u16..150 {
            if tracker.observe(ip("10.0.0.1"), 1000 + port, at((port / 15) as i64)).is_some() {
                matches += 1;
            }
        }
        assert_eq!(matches, 1);
    }

    #[test]
    fn test_sensitivity_scales_threshold() {
        let cfg = PortScanConfig {
            sensitivity: Sensitivity::High,
            ..PortScanConfig::default()
        };
        let mut tracker = PortScanTracker::new(cfg);
        // High sensitivity halves the 20-port threshold: 11 distinct ports fire.
        let mut fired = false;
        for port in 0u16..11 {
            fired |= tracker.observe(ip("10.0.0.2"), 2000 + port, at(0)).is_some();
        }
        assert!(fired);
    }

    #[test]
    fn test_eviction_at_twice_window() {
        let mut tracker = PortScanTracker::new(PortScanConfig::default());
        tracker.observe(ip("10.0.0.3"), 80, at(0));
        assert_eq!(tracker.len(), 1);
        // A packet from another source just before the boundary: old entry
        // survives (exactly at cutoff is not stale).
        tracker.observe(ip("10.0.0.4"), 81, at(120));
        assert_eq!(tracker.len(), 2);
        // Past 2×window the idle entry is gone.
        tracker.observe(ip("10.0.0.4"), 82, at(121));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_entry_refresh_resets_eviction_clock() {
        let mut tracker = PortScanTracker::new(PortScanConfig::default());
        tracker.observe(ip("10.0.0.5"), 80, at(0));
        // Refresh just before the 2×window boundary.
        tracker.observe(ip("10.0.0.5"), 81, at(119));
        // Another 119 seconds later the refreshed entry is still alive.
        tracker.observe(ip("10.0.0.6"), 82, at(238));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_score_floor_for_fast_scan() {
        let mut tracker = PortScanTracker::new(PortScanConfig::default());
        let mut last = None;
        for port in 0u16..150 {
            if let Some(m) = tracker.observe(ip("10.0.0.7"), 1000 + port, at(0)) {
                last = Some(m);
            }
        }
        let m = last.expect("scan detected");
        assert!(m.score >= 60, "score {} too low", m.score);
        assert_eq!(m.severity, Severity::High);
    }
}
