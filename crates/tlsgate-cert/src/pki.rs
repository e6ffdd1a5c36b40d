//! Development PKI
//!
//! Generates a throwaway certificate authority and issues server and client
//! certificates from it, so a tunnel can be stood up end to end without openssl.
//! **Not for production** - keys only live in memory or wherever you save them.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::path::Path;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::ServerIdentity;

#[derive(Error, Debug)]
pub enum PkiError {
    #[error("Certificate generation failed: {0}")]
    GenerationFailed(String),

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

impl From<rcgen::Error> for PkiError {
    fn from(e: rcgen::Error) -> Self {
        PkiError::GenerationFailed(e.to_string())
    }
}

/// Leaf certificates are valid for 90 days starting yesterday (clock skew).
const LEAF_VALIDITY_DAYS: i64 = 90;
const CA_VALIDITY_DAYS: i64 = 365;

/// A self-signed certificate authority that can issue leaf certificates.
pub struct CertificateAuthority {
    cert: rcgen::Certificate,
    key_pair: KeyPair,
}

impl CertificateAuthority {
    /// Generate a new CA with a fresh key pair.
    pub fn generate(common_name: &str) -> Result<Self, PkiError> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        set_validity(&mut params, -1, CA_VALIDITY_DAYS);

        let key_pair = KeyPair::generate()?;
        let cert = params.self_signed(&key_pair)?;

        Ok(Self { cert, key_pair })
    }

    pub fn cert_pem(&self) -> String {
        self.cert.pem()
    }

    pub fn cert_der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    /// Issue a server certificate whose SANs are `names` (DNS names or IP literals).
    pub fn issue_server(&self, names: &[&str]) -> Result<IssuedCertificate, PkiError> {
        let mut params =
            CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())?;
        if let Some(first) = names.first() {
            params.distinguished_name = distinguished_name(first);
        }
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        set_validity(&mut params, -1, LEAF_VALIDITY_DAYS);

        self.sign(params)
    }

    /// Issue a client certificate identified by its subject common name.
    pub fn issue_client(&self, common_name: &str) -> Result<IssuedCertificate, PkiError> {
        let params = client_params(common_name, -1, LEAF_VALIDITY_DAYS)?;
        self.sign(params)
    }

    /// Issue a client certificate whose validity period ended yesterday.
    pub fn issue_expired_client(&self, common_name: &str) -> Result<IssuedCertificate, PkiError> {
        let params = client_params(common_name, -30, -1)?;
        self.sign(params)
    }

    fn sign(&self, params: CertificateParams) -> Result<IssuedCertificate, PkiError> {
        let key_pair = KeyPair::generate()?;
        let cert = params.signed_by(&key_pair, &self.cert, &self.key_pair)?;

        Ok(IssuedCertificate {
            cert_der: cert.der().clone(),
            cert_pem: cert.pem(),
            key_pkcs8: key_pair.serialize_der(),
            key_pem: key_pair.serialize_pem(),
        })
    }
}

/// A leaf certificate with its private key, in both DER and PEM form.
pub struct IssuedCertificate {
    pub cert_der: CertificateDer<'static>,
    pub cert_pem: String,
    pub key_pem: String,
    key_pkcs8: Vec<u8>,
}

impl IssuedCertificate {
    pub fn cert_chain(&self) -> Vec<CertificateDer<'static>> {
        vec![self.cert_der.clone()]
    }

    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivatePkcs8KeyDer::from(self.key_pkcs8.clone()).into()
    }

    /// Certificate followed by key: the layout expected in a certificate directory.
    pub fn bundle_pem(&self) -> String {
        format!("{}{}", self.cert_pem, self.key_pem)
    }

    pub fn to_identity(&self, name: &str) -> ServerIdentity {
        ServerIdentity::new(name, self.cert_chain(), self.private_key())
    }

    /// Save [`Self::bundle_pem`] to `path`.
    pub fn save_bundle(&self, path: impl AsRef<Path>) -> Result<(), PkiError> {
        let path = path.as_ref();
        std::fs::write(path, self.bundle_pem()).map_err(|source| PkiError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn client_params(
    common_name: &str,
    not_before_days: i64,
    not_after_days: i64,
) -> Result<CertificateParams, PkiError> {
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    params.distinguished_name = distinguished_name(common_name);
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    set_validity(&mut params, not_before_days, not_after_days);
    Ok(params)
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "tlsgate development");
    dn
}

fn set_validity(params: &mut CertificateParams, not_before_days: i64, not_after_days: i64) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now + Duration::days(not_before_days);
    params.not_after = now + Duration::days(not_after_days);
}
