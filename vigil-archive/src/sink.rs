//! ClickHouse client wrapper and batch assembly.

use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use vigil_core::types::Event;

use crate::config::ArchiveConfig;
use crate::schema::{EventRow, NetworkFlowRow, EVENTS_DDL, NETWORK_FLOWS_DDL};

pub type SinkResult<T> = Result<T, SinkError>;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("clickhouse error: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),

    #[error("insert timed out")]
    Timeout,
}

/// Per-insert budget; a hung database must not pin the consumer forever.
const INSERT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ArchiveSink {
    client: clickhouse::Client,
}

impl ArchiveSink {
    pub fn connect(cfg: &ArchiveConfig) -> ArchiveSink {
        let client = clickhouse::Client::default()
            .with_url(cfg.url())
            .with_database(&cfg.database)
            .with_user(&cfg.user)
            .with_password(&cfg.password);
        ArchiveSink { client }
    }

    /// Create both tables idempotently.
    pub async fn init_schema(&self) -> SinkResult<()> {
        self.client.query(EVENTS_DDL).execute().await?;
        self.client.query(NETWORK_FLOWS_DDL).execute().await?;
        info!("archive schema ready");
        Ok(())
    }

    pub async fn ping(&self) -> SinkResult<()> {
        self.client.query("SELECT 1").execute().await?;
        Ok(())
    }

    /// Bulk-insert one batch. Events land in `events`; flow observations
    /// additionally land in `network_flows`.
    pub async fn insert(&self, events: &[Event]) -> SinkResult<()> {
        let (rows, flows) = assemble_rows(events);
        if rows.is_empty() {
            return Ok(());
        }

        tokio::time::timeout(INSERT_TIMEOUT, self.insert_rows(&rows, &flows))
            .await
            .map_err(|_| SinkError::Timeout)??;

        debug!(events = rows.len(), flows = flows.len(), "batch archived");
        Ok(())
    }

    async fn insert_rows(&self, rows: &[EventRow], flows: &[NetworkFlowRow]) -> SinkResult<()> {
        let mut insert = self.client.insert("events")?;
        for row in rows {
            insert.write(row).await?;
        }
        insert.end().await?;

        if !flows.is_empty() {
            let mut insert = self.client.insert("network_flows")?;
            for row in flows {
                insert.write(row).await?;
            }
            insert.end().await?;
        }
        Ok(())
    }
}

/// Project events onto rows, deduplicating by event id within the batch —
/// redelivered duplicates collapse to one row per flush.
pub fn assemble_rows(events: &[Event]) -> (Vec<EventRow>, Vec<NetworkFlowRow>) {
    let mut seen: HashSet<&str> = HashSet::with_capacity(events.len());
    let mut rows = Vec::with_capacity(events.len());
    let mut flows = Vec::new();
    for evt in events {
        if !seen.insert(evt.id.as_str()) {
            continue;
        }
        rows.push(EventRow::from_event(evt));
        if let Some(flow) = NetworkFlowRow::from_event(evt) {
            flows.push(flow);
        }
    }
    (rows, flows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::Severity;

    #[test]
    fn test_batch_dedup_by_id() {
        let mut a = Event::new("agent", "login_failed", Severity::Low);
        a.id = "E1".into();
        let b = a.clone();
        let mut c = Event::new("agent", "login_failed", Severity::Low);
        c.id = "E2".into();

        let (rows, _) = assemble_rows(&[a, b, c]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "E1");
        assert_eq!(rows[1].id, "E2");
    }

    #[test]
    fn test_flow_events_produce_both_rows() {
        let mut evt = Event::new("sensor", "network.flow", Severity::Info);
        evt.metadata.insert("transport".into(), serde_json::Value::from("UDP"));
        let (rows, flows) = assemble_rows(&[evt]);
        assert_eq!(rows.len(), 1);
        assert_eq!(flows.len(), 1);
    }
}
