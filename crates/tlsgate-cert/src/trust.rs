//! Trust context: the immutable server TLS configuration shared by every tunnel

use rustls::pki_types::CertificateDer;
use rustls::server::WebPkiClientVerifier;
use rustls::sign::CertifiedKey;
use rustls::{RootCertStore, ServerConfig};
use std::path::Path;
use std::sync::{Arc, Once};
use tracing::{debug, info};

use crate::resolver::{certificate_names, IdentityResolver};
use crate::{store, ServerIdentity, TrustError};

static CRYPTO_PROVIDER_INIT: Once = Once::new();

/// Install the ring crypto provider as the process default (once).
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("Rustls crypto provider already installed");
        }
    });
}

/// Server identities plus the client CA pool, compiled into a rustls `ServerConfig`
/// that rejects any handshake without a client certificate chaining to one of the CAs.
///
/// Built once at startup and never mutated. Clones share the same configuration.
#[derive(Debug, Clone)]
pub struct TrustContext {
    server_config: Arc<ServerConfig>,
    identities: Arc<[String]>,
    client_ca_count: usize,
}

impl TrustContext {
    /// Load identities from `cert_dir` (one `*.pem` per identity) and the client CA
    /// bundle from `client_ca_file`.
    pub fn load(
        cert_dir: impl AsRef<Path>,
        client_ca_file: impl AsRef<Path>,
    ) -> Result<Self, TrustError> {
        let identities = store::load_identity_dir(cert_dir)?;
        let client_cas = store::load_ca_bundle(client_ca_file)?;
        Self::from_parts(identities, client_cas)
    }

    /// Build from in-memory material. The first identity is presented when the
    /// client's SNI matches none of them.
    pub fn from_parts(
        identities: Vec<ServerIdentity>,
        client_cas: Vec<CertificateDer<'static>>,
    ) -> Result<Self, TrustError> {
        ensure_crypto_provider();

        if identities.is_empty() {
            return Err(TrustError::MissingIdentity);
        }
        if client_cas.is_empty() {
            return Err(TrustError::MissingClientCa);
        }

        let client_ca_count = client_cas.len();
        let mut roots = RootCertStore::empty();
        for (index, ca) in client_cas.into_iter().enumerate() {
            roots
                .add(ca)
                .map_err(|e| TrustError::InvalidClientCa {
                    index,
                    reason: e.to_string(),
                })?;
        }

        let client_verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| TrustError::Verifier(e.to_string()))?;

        let mut names = Vec::with_capacity(identities.len());
        let mut certified = Vec::with_capacity(identities.len());
        for identity in identities {
            let (dns_names, key) = certify(&identity)?;
            debug!("Identity {} serves {:?}", identity.name, dns_names);
            names.push(identity.name);
            certified.push((dns_names, key));
        }

        let resolver = IdentityResolver::new(certified).ok_or(TrustError::MissingIdentity)?;
        let server_config = ServerConfig::builder()
            .with_client_cert_verifier(client_verifier)
            .with_cert_resolver(Arc::new(resolver));

        info!(
            "Trust context ready: {} server identit{} ({}), {} client CA(s), client certificates required",
            names.len(),
            if names.len() == 1 { "y" } else { "ies" },
            names.join(", "),
            client_ca_count
        );

        Ok(Self {
            server_config: Arc::new(server_config),
            identities: names.into(),
            client_ca_count,
        })
    }

    pub fn server_config(&self) -> Arc<ServerConfig> {
        self.server_config.clone()
    }

    /// Identity names in presentation-priority order.
    pub fn identities(&self) -> &[String] {
        &self.identities
    }

    pub fn client_ca_count(&self) -> usize {
        self.client_ca_count
    }
}

fn certify(identity: &ServerIdentity) -> Result<(Vec<String>, Arc<CertifiedKey>), TrustError> {
    let invalid = |reason: String| TrustError::InvalidIdentity {
        name: identity.name.clone(),
        reason,
    };

    let leaf = identity
        .cert_chain
        .first()
        .ok_or_else(|| invalid("empty certificate chain".to_string()))?;
    let dns_names = certificate_names(leaf).map_err(invalid)?;

    let signing_key = rustls::crypto::ring::sign::any_supported_type(&identity.private_key)
        .map_err(|e| invalid(format!("unsupported private key: {e}")))?;
    let certified = CertifiedKey::new(identity.cert_chain.clone(), signing_key);
    certified
        .keys_match()
        .map_err(|e| invalid(format!("private key does not match certificate: {e}")))?;

    Ok((dns_names, Arc::new(certified)))
}
