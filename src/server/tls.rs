//! Building a [`TlsAcceptor`] from certificate material.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use super::ServerError;

/// Loads a PEM certificate chain and private key.
///
/// # Errors
///
/// [`ServerError::TlsFile`] if a file cannot be read or parsed,
/// [`ServerError::NoPrivateKey`] if the key file holds no key, or
/// [`ServerError::Tls`] if rustls rejects the pair.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, ServerError> {
    let mut certs_reader = BufReader::new(File::open(cert_path).map_err(tls_file(cert_path))?);
    let certs = rustls_pemfile::certs(&mut certs_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(tls_file(cert_path))?;

    let mut key_reader = BufReader::new(File::open(key_path).map_err(tls_file(key_path))?);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(tls_file(key_path))?
        .ok_or_else(|| ServerError::NoPrivateKey {
            path: key_path.to_path_buf(),
        })?;

    acceptor_from_der(certs, key)
}

fn tls_file(path: &Path) -> impl FnOnce(std::io::Error) -> ServerError + '_ {
    move |source| ServerError::TlsFile {
        path: path.to_path_buf(),
        source,
    }
}

/// Builds an acceptor from DER-encoded material.
///
/// # Errors
///
/// [`ServerError::Tls`] if rustls rejects the certificate or key.
pub fn acceptor_from_der(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<TlsAcceptor, ServerError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
