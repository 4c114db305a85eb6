//! Enrichment worker configuration.

use vigil_core::config::env_or;

#[derive(Debug, Clone)]
pub struct EnrichConfig {
    pub maxmind_db_path: String,
    pub abuseipdb_key: String,
    pub otx_key: String,
}

impl EnrichConfig {
    pub fn from_env() -> EnrichConfig {
        EnrichConfig {
            maxmind_db_path: env_or("MAXMIND_DB_PATH", ""),
            abuseipdb_key: env_or("ABUSEIPDB_KEY", ""),
            otx_key: env_or("OTX_KEY", ""),
        }
    }
}
