//! Server certificate selection by SNI

use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;
use x509_parser::extensions::GeneralName;

/// Picks the identity whose names match the SNI; falls back to the first identity
/// when the client sends no SNI or nothing matches.
#[derive(Debug)]
pub(crate) struct IdentityResolver {
    exact: HashMap<String, Arc<CertifiedKey>>,
    /// `*.example.com` is stored under `example.com`
    wildcard: HashMap<String, Arc<CertifiedKey>>,
    default: Arc<CertifiedKey>,
}

impl IdentityResolver {
    /// `identities` is in priority order. Returns `None` when it is empty.
    pub(crate) fn new(identities: Vec<(Vec<String>, Arc<CertifiedKey>)>) -> Option<Self> {
        let default = identities.first()?.1.clone();
        let mut exact = HashMap::new();
        let mut wildcard = HashMap::new();

        for (names, key) in identities {
            for name in names {
                let name = normalize(&name);
                match name.strip_prefix("*.") {
                    Some(parent) => {
                        wildcard.entry(parent.to_string()).or_insert_with(|| key.clone());
                    }
                    None => {
                        exact.entry(name).or_insert_with(|| key.clone());
                    }
                }
            }
        }

        Some(Self {
            exact,
            wildcard,
            default,
        })
    }

    fn lookup(&self, server_name: &str) -> Option<&Arc<CertifiedKey>> {
        let name = normalize(server_name);
        if let Some(key) = self.exact.get(&name) {
            return Some(key);
        }
        let (_, parent) = name.split_once('.')?;
        self.wildcard.get(parent)
    }
}

impl ResolvesServerCert for IdentityResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name();
        let selected = server_name
            .and_then(|name| self.lookup(name))
            .unwrap_or(&self.default);
        trace!("Selected server certificate for SNI {:?}", server_name);
        Some(selected.clone())
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// DNS names a leaf certificate is valid for: its SAN DNS entries, or the subject
/// common name(s) when the certificate carries no DNS SAN.
pub(crate) fn certificate_names(cert: &CertificateDer<'_>) -> Result<Vec<String>, String> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| format!("unparseable leaf certificate: {e}"))?;

    let mut names = Vec::new();
    if let Ok(Some(san)) = parsed.subject_alternative_name() {
        for general_name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = general_name {
                names.push(dns.to_string());
            }
        }
    }

    if names.is_empty() {
        names.extend(
            parsed
                .subject()
                .iter_common_name()
                .filter_map(|cn| cn.as_str().ok())
                .map(str::to_string),
        );
    }

    Ok(names)
}
