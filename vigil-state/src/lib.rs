//! # Vigil State — shared key/value cache
//!
//! Thin wrapper over Redis giving the pipeline its shared mutable state:
//! sliding-window correlation counters, the threat-intel cache, rate
//! limits, agent sessions, and alert target parking. Everything is TTL'd;
//! nothing here is a system of record.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tracing::debug;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid cache address: {0}")]
    Address(String),
}

/// Connection settings, usually from `REDIS_ADDR`/`REDIS_PASSWORD`.
#[derive(Debug, Clone)]
pub struct StateConfig {
    pub addr: String,
    pub password: String,
}

impl StateConfig {
    pub fn from_env() -> StateConfig {
        StateConfig {
            addr: vigil_core::config::env_or("REDIS_ADDR", "127.0.0.1:6379"),
            password: vigil_core::config::env_or("REDIS_PASSWORD", ""),
        }
    }

    fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}", self.addr)
        } else {
            format!("redis://:{}@{}", self.password, self.addr)
        }
    }
}

// ── Key builders ─────────────────────────────────────────────────────────────

fn intel_key(ip: &str) -> String {
    format!("threat:intel:{ip}")
}

fn counter_key(rule_id: &str) -> String {
    format!("correlation:counter:{rule_id}")
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn rate_limit_key(identifier: &str) -> String {
    format!("ratelimit:{identifier}")
}

fn alert_target_key(event_id: &str) -> String {
    format!("alert:target:{event_id}")
}

// ── Cache client ─────────────────────────────────────────────────────────────

/// Cloneable handle to the shared cache. The underlying connection manager
/// reconnects on its own; callers treat every operation as fallible and
/// fail-open where the error policy says so.
#[derive(Clone)]
pub struct StateCache {
    conn: ConnectionManager,
}

impl StateCache {
    pub async fn connect(cfg: &StateConfig) -> StateResult<StateCache> {
        let client = redis::Client::open(cfg.url())
            .map_err(|e| StateError::Address(e.to_string()))?;
        let conn = ConnectionManager::new(client).await?;
        debug!(addr = %cfg.addr, "state cache connected");
        Ok(StateCache { conn })
    }

    pub async fn ping(&self) -> StateResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    // ── Generic TTL'd key/value ──────────────────────────────────────────

    pub async fn set_ttl(&self, key: &str, value: &str, ttl: Duration) -> StateResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> StateResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn delete(&self, key: &str) -> StateResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> StateResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    pub async fn incr(&self, key: &str) -> StateResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1).await?)
    }

    /// Pipelined INCR + EXPIRE: the refresh-on-every-hit TTL is what makes
    /// the counter an (approximate) sliding window.
    pub async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> StateResult<i64> {
        let mut conn = self.conn.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, ttl.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    /// Value and remaining TTL in one round trip.
    pub async fn get_with_ttl(&self, key: &str) -> StateResult<(Option<String>, i64)> {
        let mut conn = self.conn.clone();
        let (value, ttl): (Option<String>, i64) = redis::pipe()
            .get(key)
            .ttl(key)
            .query_async(&mut conn)
            .await?;
        Ok((value, ttl))
    }

    // ── Correlation sliding windows ──────────────────────────────────────

    pub async fn incr_correlation_counter(&self, rule_id: &str, window: Duration) -> StateResult<i64> {
        self.incr_with_ttl(&counter_key(rule_id), window).await
    }

    pub async fn correlation_counter(&self, rule_id: &str) -> StateResult<i64> {
        let mut conn = self.conn.clone();
        let v: Option<i64> = conn.get(counter_key(rule_id)).await?;
        Ok(v.unwrap_or(0))
    }

    pub async fn reset_correlation_counter(&self, rule_id: &str) -> StateResult<()> {
        self.delete(&counter_key(rule_id)).await
    }

    // ── Threat-intel cache ───────────────────────────────────────────────

    pub async fn set_threat_intel(&self, ip: &str, verdict: &str, ttl: Duration) -> StateResult<()> {
        self.set_ttl(&intel_key(ip), verdict, ttl).await
    }

    pub async fn threat_intel(&self, ip: &str) -> StateResult<Option<String>> {
        self.get(&intel_key(ip)).await
    }

    // ── Sessions (dashboard API) ─────────────────────────────────────────

    pub async fn set_session(&self, session_id: &str, user_id: &str, ttl: Duration) -> StateResult<()> {
        self.set_ttl(&session_key(session_id), user_id, ttl).await
    }

    pub async fn session(&self, session_id: &str) -> StateResult<Option<String>> {
        self.get(&session_key(session_id)).await
    }

    pub async fn delete_session(&self, session_id: &str) -> StateResult<()> {
        self.delete(&session_key(session_id)).await
    }

    // ── Rate limiting ────────────────────────────────────────────────────

    /// Returns `(current, allowed)`; allowed iff current ≤ limit.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        limit: i64,
        window: Duration,
    ) -> StateResult<(i64, bool)> {
        let current = self.incr_with_ttl(&rate_limit_key(identifier), window).await?;
        Ok((current, current <= limit))
    }

    // ── Alert target parking ─────────────────────────────────────────────
    //
    // The correlator parks each matched event's source_ip under its event
    // id so the orchestrator can resolve a target without re-reading the
    // event stream.

    pub async fn park_alert_target(&self, event_id: &str, source_ip: &str, ttl: Duration) -> StateResult<()> {
        self.set_ttl(&alert_target_key(event_id), source_ip, ttl).await
    }

    pub async fn alert_target(&self, event_id: &str) -> StateResult<Option<String>> {
        self.get(&alert_target_key(event_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_namespaces() {
        assert_eq!(intel_key("1.2.3.4"), "threat:intel:1.2.3.4");
        assert_eq!(counter_key("R1"), "correlation:counter:R1");
        assert_eq!(session_key("s-9"), "session:s-9");
        assert_eq!(rate_limit_key("ingest:10.0.0.1"), "ratelimit:ingest:10.0.0.1");
        assert_eq!(alert_target_key("E1"), "alert:target:E1");
    }

    #[test]
    fn test_url_shapes() {
        let plain = StateConfig { addr: "cache:6379".into(), password: String::new() };
        assert_eq!(plain.url(), "redis://cache:6379");
        let auth = StateConfig { addr: "cache:6379".into(), password: "hunter2".into() };
        assert_eq!(auth.url(), "redis://:hunter2@cache:6379");
    }
}
