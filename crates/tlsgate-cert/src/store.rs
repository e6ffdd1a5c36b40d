//! PEM loading for server identities and client CA bundles
//!
//! A certificate directory holds one `*.pem` file per identity, each containing the
//! certificate chain (leaf first) and its private key. Any other file is ignored.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::Item;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{ServerIdentity, TrustError};

const IDENTITY_EXTENSION: &str = "pem";

/// Load every `*.pem` identity in `dir`, in file name order.
///
/// Fails on the first unreadable or malformed file, and when the directory holds no
/// identity at all.
pub fn load_identity_dir(dir: impl AsRef<Path>) -> Result<Vec<ServerIdentity>, TrustError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|source| TrustError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| TrustError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == IDENTITY_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();

    if paths.is_empty() {
        return Err(TrustError::NoIdentities(dir.to_path_buf()));
    }

    paths.iter().map(load_identity_file).collect()
}

/// Load a single identity file holding a certificate chain and exactly one private key.
pub fn load_identity_file(path: impl AsRef<Path>) -> Result<ServerIdentity, TrustError> {
    let path = path.as_ref();
    let items = read_pem_items(path)?;

    let mut cert_chain = Vec::new();
    let mut keys: Vec<PrivateKeyDer<'static>> = Vec::new();
    for item in items {
        match item {
            Item::X509Certificate(cert) => cert_chain.push(cert),
            Item::Pkcs8Key(key) => keys.push(key.into()),
            Item::Pkcs1Key(key) => keys.push(key.into()),
            Item::Sec1Key(key) => keys.push(key.into()),
            _ => {}
        }
    }

    if cert_chain.is_empty() {
        return Err(TrustError::NoCertificates(path.to_path_buf()));
    }
    let private_key = match keys.len() {
        0 => return Err(TrustError::NoPrivateKey(path.to_path_buf())),
        1 => keys.remove(0),
        _ => return Err(TrustError::MultiplePrivateKeys(path.to_path_buf())),
    };

    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    debug!(
        "Loaded identity {} ({} certificate(s)) from {}",
        name,
        cert_chain.len(),
        path.display()
    );

    Ok(ServerIdentity::new(name, cert_chain, private_key))
}

/// Load all certificates from a CA bundle. Non-certificate PEM sections are ignored.
pub fn load_ca_bundle(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>, TrustError> {
    let path = path.as_ref();
    let certs: Vec<_> = read_pem_items(path)?
        .into_iter()
        .filter_map(|item| match item {
            Item::X509Certificate(cert) => Some(cert),
            _ => None,
        })
        .collect();

    if certs.is_empty() {
        return Err(TrustError::NoCertificates(path.to_path_buf()));
    }

    debug!(
        "Loaded {} client CA certificate(s) from {}",
        certs.len(),
        path.display()
    );
    Ok(certs)
}

fn read_pem_items(path: &Path) -> Result<Vec<Item>, TrustError> {
    let data = std::fs::read(path).map_err(|source| TrustError::Read {
        path: PathBuf::from(path),
        source,
    })?;

    rustls_pemfile::read_all(&mut data.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TrustError::Parse {
            path: PathBuf::from(path),
            source,
        })
}
