//! Certificate loading and self-signed provisioning.

use std::fs;
use std::io::BufReader;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;

use crate::config::KeyType;
use crate::transport::TransportError;

/// Load a PEM certificate chain.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let file = fs::File::open(path).map_err(|e| {
        TransportError::Certificate(format!("cannot open certificate {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|e| {
            TransportError::Certificate(format!("cannot parse certificate {}: {e}", path.display()))
        })?;
    if certs.is_empty() {
        return Err(TransportError::Certificate(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load a PEM private key (PKCS#8, PKCS#1, or SEC1).
pub fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let file = fs::File::open(path).map_err(|e| {
        TransportError::Certificate(format!("cannot open key {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            TransportError::Certificate(format!("cannot parse key {}: {e}", path.display()))
        })?
        .ok_or_else(|| {
            TransportError::Certificate(format!("no private key found in {}", path.display()))
        })
}

/// Load a PEM bundle into a trust-anchor store.
pub fn load_root_store(path: &Path) -> Result<RootCertStore, TransportError> {
    let mut store = RootCertStore::empty();
    for cert in load_certs(path)? {
        store.add(cert).map_err(|e| {
            TransportError::Certificate(format!(
                "cannot use {} as a trust anchor: {e}",
                path.display()
            ))
        })?;
    }
    Ok(store)
}

/// Write a fresh self-signed certificate and key unless both files already
/// exist. Existing material is never overwritten.
pub fn ensure_self_signed(
    cert_path: &Path,
    key_path: &Path,
    key_type: KeyType,
) -> Result<(), TransportError> {
    if cert_path.exists() && key_path.exists() {
        tracing::debug!(
            cert = %cert_path.display(),
            key = %key_path.display(),
            "reusing existing certificate material"
        );
        return Ok(());
    }

    let subject_names = vec!["localhost".to_string()];
    let (cert_pem, key_pem) = match key_type {
        KeyType::Ecdsa => {
            let generated = rcgen::generate_simple_self_signed(subject_names)
                .map_err(|e| TransportError::Certificate(format!("key generation failed: {e}")))?;
            (generated.cert.pem(), generated.key_pair.serialize_pem())
        }
        KeyType::Ed25519 => {
            let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519)
                .map_err(|e| TransportError::Certificate(format!("key generation failed: {e}")))?;
            let params = rcgen::CertificateParams::new(subject_names)
                .map_err(|e| TransportError::Certificate(format!("certificate params: {e}")))?;
            let cert = params.self_signed(&key_pair).map_err(|e| {
                TransportError::Certificate(format!("self-signing failed: {e}"))
            })?;
            (cert.pem(), key_pair.serialize_pem())
        }
    };

    fs::write(cert_path, cert_pem).map_err(|e| {
        TransportError::Certificate(format!("cannot write {}: {e}", cert_path.display()))
    })?;
    fs::write(key_path, key_pem).map_err(|e| {
        TransportError::Certificate(format!("cannot write {}: {e}", key_path.display()))
    })?;
    tracing::info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        key_type = ?key_type,
        "generated self-signed certificate"
    );
    Ok(())
}
