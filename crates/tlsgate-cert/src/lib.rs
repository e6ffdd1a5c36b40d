//! Trust material for the TLS listeners
//!
//! Loads the listener's certificate/key pairs and the CA bundle used to verify client
//! certificates, and turns them into one immutable rustls server configuration that
//! demands a client certificate on every handshake.

pub mod pki;
mod resolver;
pub mod store;
pub mod trust;

pub use pki::{CertificateAuthority, IssuedCertificate, PkiError};
pub use store::{load_ca_bundle, load_identity_dir, load_identity_file};
pub use trust::{ensure_crypto_provider, TrustContext};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::path::PathBuf;
use thiserror::Error;

/// One certificate chain with its private key, presented by the listener during the
/// handshake.
#[derive(Debug)]
pub struct ServerIdentity {
    /// File stem the identity was loaded from, used in logs
    pub name: String,
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
}

impl ServerIdentity {
    pub fn new(
        name: impl Into<String>,
        cert_chain: Vec<CertificateDer<'static>>,
        private_key: PrivateKeyDer<'static>,
    ) -> Self {
        Self {
            name: name.into(),
            cert_chain,
            private_key,
        }
    }
}

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse PEM in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("No private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("More than one private key found in {}", .0.display())]
    MultiplePrivateKeys(PathBuf),

    #[error("No certificate/key pairs (*.pem) found in {}", .0.display())]
    NoIdentities(PathBuf),

    #[error("At least one server certificate/key pair is required")]
    MissingIdentity,

    #[error("At least one client CA certificate is required")]
    MissingClientCa,

    #[error("Invalid certificate/key pair {name}: {reason}")]
    InvalidIdentity { name: String, reason: String },

    #[error("Invalid client CA certificate #{index}: {reason}")]
    InvalidClientCa { index: usize, reason: String },

    #[error("Failed to build client certificate verifier: {0}")]
    Verifier(String),
}
