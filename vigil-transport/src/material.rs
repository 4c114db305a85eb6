//! Certificate loading and rustls config construction.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use x509_parser::prelude::FromDer;
use x509_parser::certificate::X509Certificate;

use crate::{TransportError, TransportResult};

/// Certificate triplet on disk, usually from `SGE_CERT_FILE`,
/// `SGE_KEY_FILE`, `SGE_CA_FILE`.
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert_file: String,
    pub key_file: String,
    pub ca_file: String,
}

impl TlsPaths {
    pub fn from_env() -> Option<TlsPaths> {
        let cert_file = std::env::var("SGE_CERT_FILE").ok()?;
        let key_file = std::env::var("SGE_KEY_FILE").ok()?;
        let ca_file = std::env::var("SGE_CA_FILE").ok()?;
        Some(TlsPaths { cert_file, key_file, ca_file })
    }
}

/// One loaded snapshot of certificate material plus the configs built from
/// it. Snapshots are immutable; rotation produces a new one.
pub struct TlsMaterial {
    pub client: Arc<ClientConfig>,
    pub server: Arc<ServerConfig>,
    /// Our own certificate's expiry, drives rotation.
    pub not_after: DateTime<Utc>,
    /// Common name of our own certificate (logical identity).
    pub identity: String,
}

impl TlsMaterial {
    pub fn load(paths: &TlsPaths) -> TransportResult<TlsMaterial> {
        let certs = read_certs(&paths.cert_file)?;
        let key = read_key(&paths.key_file)?;
        let ca_certs = read_certs(&paths.ca_file)?;

        let leaf = certs
            .first()
            .ok_or_else(|| TransportError::NoCertificate(paths.cert_file.clone()))?;
        let (not_after, identity) = inspect_leaf(leaf)?;

        let mut roots = RootCertStore::empty();
        for ca in &ca_certs {
            roots
                .add(ca.clone())
                .map_err(|e| TransportError::CertParse(e.to_string()))?;
        }
        let roots = Arc::new(roots);

        let client = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
            .with_root_certificates(roots.as_ref().clone())
            .with_client_auth_cert(certs.clone(), key.clone_key())?;

        let verifier = WebPkiClientVerifier::builder(roots)
            .build()
            .map_err(|e| TransportError::Verifier(e.to_string()))?;
        let server = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)?;

        Ok(TlsMaterial {
            client: Arc::new(client),
            server: Arc::new(server),
            not_after,
            identity,
        })
    }
}

/// Extract the common name from a peer's DER certificate. The CN is the
/// logical identity used for authorization decisions.
pub fn peer_common_name(cert_der: &[u8]) -> Option<String> {
    let (_, cert) = X509Certificate::from_der(cert_der).ok()?;
    let name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string());
    name
}

fn inspect_leaf(der: &CertificateDer<'_>) -> TransportResult<(DateTime<Utc>, String)> {
    let (_, cert) = X509Certificate::from_der(der.as_ref())
        .map_err(|e| TransportError::CertParse(e.to_string()))?;
    let not_after = Utc
        .timestamp_opt(cert.validity().not_after.timestamp(), 0)
        .single()
        .ok_or_else(|| TransportError::CertParse("invalid notAfter".into()))?;
    let identity = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();
    Ok((not_after, identity))
}

fn read_certs(path: &str) -> TransportResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|source| TransportError::Io {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|source| TransportError::Io {
            path: path.to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TransportError::NoCertificate(path.to_string()));
    }
    Ok(certs)
}

fn read_key(path: &str) -> TransportResult<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|source| TransportError::Io {
        path: path.to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TransportError::Io {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| TransportError::NoPrivateKey(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_paths() -> TlsPaths {
        let base = concat!(env!("CARGO_MANIFEST_DIR"), "/testdata");
        TlsPaths {
            cert_file: format!("{base}/test.crt"),
            key_file: format!("{base}/test.key"),
            ca_file: format!("{base}/ca.crt"),
        }
    }

    #[test]
    fn test_load_material_and_identity() {
        let material = TlsMaterial::load(&fixture_paths()).unwrap();
        assert_eq!(material.identity, "test-agent");
        assert!(material.not_after > Utc::now());
    }

    #[test]
    fn test_peer_common_name_from_der() {
        let certs = read_certs(&fixture_paths().cert_file).unwrap();
        let cn = peer_common_name(certs[0].as_ref()).unwrap();
        assert_eq!(cn, "test-agent");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let paths = TlsPaths {
            cert_file: "/nonexistent/agent.crt".into(),
            key_file: "/nonexistent/agent.key".into(),
            ca_file: "/nonexistent/ca.crt".into(),
        };
        assert!(matches!(TlsMaterial::load(&paths), Err(TransportError::Io { .. })));
    }
}
