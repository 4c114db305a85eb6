//! Rotation: reload certificate material when validity runs low and swap
//! the shared snapshot atomically.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use rustls::{ClientConfig, ServerConfig};
use tracing::{info, warn};

use crate::material::{TlsMaterial, TlsPaths};
use crate::TransportResult;

/// Shared, hot-swappable TLS context. Readers grab the current snapshot;
/// the rotation task replaces it wholesale, so connections in flight keep
/// the config they handshook with.
pub struct TlsContext {
    paths: TlsPaths,
    current: RwLock<Arc<TlsMaterial>>,
}

impl TlsContext {
    pub fn load(paths: TlsPaths) -> TransportResult<Arc<TlsContext>> {
        let material = TlsMaterial::load(&paths)?;
        info!(identity = %material.identity, not_after = %material.not_after, "tls material loaded");
        Ok(Arc::new(TlsContext {
            paths,
            current: RwLock::new(Arc::new(material)),
        }))
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.current.read().client.clone()
    }

    pub fn server_config(&self) -> Arc<ServerConfig> {
        self.current.read().server.clone()
    }

    pub fn identity(&self) -> String {
        self.current.read().identity.clone()
    }

    /// Remaining validity of the current leaf certificate.
    pub fn remaining_validity(&self) -> chrono::Duration {
        self.current.read().not_after - Utc::now()
    }

    /// Reload from disk and swap the snapshot.
    pub fn reload(&self) -> TransportResult<()> {
        let material = TlsMaterial::load(&self.paths)?;
        info!(not_after = %material.not_after, "tls material rotated");
        *self.current.write() = Arc::new(material);
        Ok(())
    }

    /// Periodic expiry check. When the remaining validity drops below
    /// `threshold` the on-disk material (renewed out-of-band by the cert
    /// issuer) is reloaded. Reload failures keep the old snapshot.
    pub fn spawn_rotation(
        self: &Arc<Self>,
        check_interval: Duration,
        threshold: chrono::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let remaining = ctx.remaining_validity();
                if remaining < threshold {
                    warn!(
                        remaining_hours = remaining.num_hours(),
                        "certificate validity below rotation threshold, reloading"
                    );
                    if let Err(err) = ctx.reload() {
                        warn!(error = %err, "certificate rotation failed, keeping current material");
                    }
                }
            }
        })
    }
}
