//! Threat-intel reputation with cache-through semantics.
//!
//! Verdicts live in the shared cache under `threat:intel:<ip>` for 24
//! hours — one external call per IP per day, hit or miss alike. Provider
//! failures are fail-open: the event passes through unenriched.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vigil_core::net::is_private_ip;
use vigil_state::StateCache;

/// Verdict cache lifetime.
pub const INTEL_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);
/// Confidence at or above which an IP is treated as malicious.
const MALICIOUS_CONFIDENCE: u8 = 75;
/// Per-call budget for the external API.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reputation {
    pub ip: String,
    pub score: u8,
    pub is_malicious: bool,
    pub source: String,
}

/// An external reputation source. `None` means the provider has no
/// verdict (disabled, unsupported address class).
pub trait IntelProvider: Send + Sync {
    fn check_ip(&self, ip: &str) -> impl Future<Output = Result<Option<Reputation>, String>> + Send;
}

// ── External providers ───────────────────────────────────────────────────────

/// AbuseIPDB-class checker; falls back to OTX when only that key is
/// present, and disables itself with neither.
pub struct ExternalProvider {
    client: reqwest::Client,
    kind: ProviderKind,
}

enum ProviderKind {
    AbuseIpDb { key: String },
    Otx { key: String },
    Disabled,
}

#[derive(Deserialize)]
struct AbuseIpDbEnvelope {
    data: AbuseIpDbData,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbuseIpDbData {
    abuse_confidence_score: u8,
}

#[derive(Deserialize)]
struct OtxEnvelope {
    pulse_info: OtxPulseInfo,
}

#[derive(Deserialize)]
struct OtxPulseInfo {
    count: u64,
}

impl ExternalProvider {
    pub fn from_keys(abuse_key: &str, otx_key: &str) -> ExternalProvider {
        let kind = if !abuse_key.is_empty() {
            ProviderKind::AbuseIpDb { key: abuse_key.to_string() }
        } else if !otx_key.is_empty() {
            ProviderKind::Otx { key: otx_key.to_string() }
        } else {
            ProviderKind::Disabled
        };
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .unwrap_or_default();
        ExternalProvider { client, kind }
    }

    async fn check_abuseipdb(&self, key: &str, ip: &str) -> Result<Option<Reputation>, String> {
        let resp = self
            .client
            .get("https://api.abuseipdb.com/api/v2/check")
            .query(&[("ipAddress", ip), ("maxAgeInDays", "90")])
            .header("Key", key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("abuseipdb status {}", resp.status()));
        }
        let envelope: AbuseIpDbEnvelope = resp.json().await.map_err(|e| e.to_string())?;
        let score = envelope.data.abuse_confidence_score;
        Ok(Some(Reputation {
            ip: ip.to_string(),
            score,
            is_malicious: score >= MALICIOUS_CONFIDENCE,
            source: "AbuseIPDB".to_string(),
        }))
    }

    async fn check_otx(&self, key: &str, ip: &str) -> Result<Option<Reputation>, String> {
        let url = format!("https://otx.alienvault.com/api/v1/indicators/IPv4/{ip}/general");
        let resp = self
            .client
            .get(url)
            .header("X-OTX-API-KEY", key)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("otx status {}", resp.status()));
        }
        let envelope: OtxEnvelope = resp.json().await.map_err(|e| e.to_string())?;
        let malicious = envelope.pulse_info.count > 0;
        Ok(Some(Reputation {
            ip: ip.to_string(),
            score: if malicious { 80 } else { 0 },
            is_malicious: malicious,
            source: "OTX".to_string(),
        }))
    }
}

impl IntelProvider for ExternalProvider {
    async fn check_ip(&self, ip: &str) -> Result<Option<Reputation>, String> {
        match &self.kind {
            ProviderKind::AbuseIpDb { key } => self.check_abuseipdb(key, ip).await,
            ProviderKind::Otx { key } => self.check_otx(key, ip).await,
            ProviderKind::Disabled => Ok(None),
        }
    }
}

// ── Caching wrapper ──────────────────────────────────────────────────────────

pub struct CachingProvider<P: IntelProvider> {
    provider: P,
    cache: Option<StateCache>,
}

impl<P: IntelProvider> CachingProvider<P> {
    pub fn new(provider: P, cache: Option<StateCache>) -> CachingProvider<P> {
        CachingProvider { provider, cache }
    }

    /// Verdict for `ip`, from cache when fresh. Private and loopback
    /// addresses are never looked up. Every error path returns `None` so
    /// the caller passes the event through unchanged.
    pub async fn reputation(&self, ip: &str) -> Option<Reputation> {
        if ip.is_empty() || is_private_ip(ip) {
            return None;
        }

        if let Some(cache) = &self.cache {
            match cache.threat_intel(ip).await {
                Ok(Some(cached)) => {
                    if let Ok(rep) = serde_json::from_str::<Reputation>(&cached) {
                        debug!(ip, "threat intel cache hit");
                        return Some(rep);
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(ip, error = %err, "intel cache read failed"),
            }
        }

        let rep = match self.provider.check_ip(ip).await {
            Ok(Some(rep)) => rep,
            Ok(None) => return None,
            Err(err) => {
                // Fail open: the event continues without a verdict.
                warn!(ip, error = %err, "intel provider failed");
                return None;
            }
        };

        if let Some(cache) = &self.cache {
            if let Ok(serialized) = serde_json::to_string(&rep) {
                if let Err(err) = cache.set_threat_intel(ip, &serialized, INTEL_CACHE_TTL).await {
                    warn!(ip, error = %err, "intel cache write failed");
                }
            }
        }

        Some(rep)
    }
}

// ── Test stub ────────────────────────────────────────────────────────────────

/// Provider with a fixed list of bad IPs; counts external calls so tests
/// can assert cache-once behaviour.
pub struct StubProvider {
    pub bad_ips: Vec<String>,
    pub calls: std::sync::atomic::AtomicU64,
}

impl StubProvider {
    pub fn flagging(bad_ips: &[&str]) -> StubProvider {
        StubProvider {
            bad_ips: bad_ips.iter().map(|s| s.to_string()).collect(),
            calls: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl IntelProvider for StubProvider {
    async fn check_ip(&self, ip: &str) -> Result<Option<Reputation>, String> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let malicious = self.bad_ips.iter().any(|bad| bad == ip);
        Ok(Some(Reputation {
            ip: ip.to_string(),
            score: if malicious { 100 } else { 0 },
            is_malicious: malicious,
            source: "stub".to_string(),
        }))
    }
}
