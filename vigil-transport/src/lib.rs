//! # Vigil Transport — mutual TLS for every channel
//!
//! Both sides of every bus connection and agent↔server channel
//! authenticate with certificates issued by a shared trust root: TLS 1.3
//! only (all 1.3 suites are AEAD), the server requires and verifies client
//! certificates, the client verifies the server against the root, and the
//! certificate common name becomes the logical peer identity.
//!
//! Certificate material is reloaded from disk and atomically swapped when
//! remaining validity drops below the rotation threshold; connections
//! already established keep their session, new connections pick up the
//! fresh snapshot.

mod material;
mod rotation;

pub use material::{peer_common_name, TlsMaterial, TlsPaths};
pub use rotation::TlsContext;

use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificate found in {0}")]
    NoCertificate(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    #[error("certificate parse error: {0}")]
    CertParse(String),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("client verifier error: {0}")]
    Verifier(String),
}
