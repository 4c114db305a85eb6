//! Data exfiltration tracking keyed by (source, destination, destination
//! port): cumulative outbound volume and sustained transfer rate.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::warn;

use vigil_core::types::{FieldMap, Severity};

use super::{ThreatKind, ThreatMatch};

#[derive(Debug, Clone)]
pub struct ExfilConfig {
    pub window: TimeDelta,
    /// Bytes per second above which the flow is suspect.
    pub rate_threshold: u64,
    /// Total bytes above which the flow is suspect regardless of rate.
    pub volume_threshold: u64,
}

impl Default for ExfilConfig {
    fn default() -> ExfilConfig {
        ExfilConfig {
            window: TimeDelta::hours(1),
            rate_threshold: 1024 * 1024,         // 1 MiB/s
            volume_threshold: 100 * 1024 * 1024, // 100 MiB
        }
    }
}

struct Entry {
    bytes_sent: u64,
    start_time: DateTime<Utc>,
    last_time: DateTime<Utc>,
    reported_at: Option<DateTime<Utc>>,
}

pub struct ExfilTracker {
    entries: HashMap<(IpAddr, IpAddr, u16), Entry>,
    cfg: ExfilConfig,
}

impl ExfilTracker {
    pub fn new(cfg: ExfilConfig) -> ExfilTracker {
        ExfilTracker { entries: HashMap::new(), cfg }
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
        bytes: u64,
        ts: DateTime<Utc>,
    ) -> Option<ThreatMatch> {
        self.evict_stale(ts);

        let entry = self.entries.entry((src_ip, dst_ip, dst_port)).or_insert_with(|| Entry {
            bytes_sent: 0,
            start_time: ts,
            last_time: ts,
            reported_at: None,
        });
        entry.bytes_sent = entry.bytes_sent.saturating_add(bytes);
        entry.last_time = ts;

        let elapsed = (entry.last_time - entry.start_time).num_milliseconds() as f64 / 1000.0;
        let rate = if elapsed > 0.0 {
            entry.bytes_sent as f64 / elapsed
        } else {
            0.0
        };

        let rate_exceeded = rate > self.cfg.rate_threshold as f64;
        let volume_exceeded = entry.bytes_sent > self.cfg.volume_threshold;
        if !rate_exceeded && !volume_exceeded {
            return None;
        }
        if let Some(reported) = entry.reported_at {
            if ts - reported < self.cfg.window {
                return None;
            }
        }
        entry.reported_at = Some(ts);

        // Blend both pressure axes in proportion to their thresholds.
        let score = ((rate / self.cfg.rate_threshold as f64) * 50.0
            + (entry.bytes_sent as f64 / self.cfg.volume_threshold as f64) * 50.0)
            .min(100.0) as u8;

        warn!(
            src = %src_ip, dst = %dst_ip, port = dst_port,
            mb = entry.bytes_sent / (1024 * 1024),
            "data exfiltration detected"
        );

        let mut metadata = FieldMap::new();
        metadata.insert("total_bytes".into(), Value::from(entry.bytes_sent));
        metadata.insert("rate_bps".into(), Value::from(rate));
        metadata.insert("duration_sec".into(), Value::from(elapsed));

        Some(ThreatMatch {
            kind: ThreatKind::Exfiltration,
            severity: Severity::High,
            source_ip: src_ip,
            dest_ip: Some(dst_ip),
            dest_port: dst_port,
            protocol: protocol.to_string(),
            description: format!(
                "Data exfiltration detected: {:.2} MB at {:.2} KB/s",
                entry.bytes_sent as f64 / (1024.0 * 1024.0),
                rate / 1024.0
            ),
            score,
            metadata,
            timestamp: ts,
        })
    }

    fn evict_stale(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.cfg.window * 2;
        self.entries.retain(|_, e| e.last_time >= cutoff);
    }
}
