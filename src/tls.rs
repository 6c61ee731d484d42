/* src/tls.rs */

use crate::error::HandshakeError;
use crate::locator::get_path_to_certificate;
use crate::registry::Registry;
use fancy_log::{LogLevel, log};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Picks the certificate for each handshake from the server name the client
/// sent. There is no fallback certificate.
#[derive(Debug)]
pub struct CertificateResolver {
    registry: Arc<Registry>,
}

impl CertificateResolver {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Builds the credential for `domain`, reading its files from disk.
    ///
    /// Material is re-read on every call so replaced certificates are picked up
    /// without a restart.
    pub fn resolve_domain(&self, domain: &str) -> Result<Arc<CertifiedKey>, HandshakeError> {
        let file = self
            .registry
            .find(domain)
            .ok_or_else(|| HandshakeError::UnknownDomain(domain.to_owned()))?;
        if !file.config.allow_https {
            return Err(HandshakeError::HttpsDisabled(domain.to_owned()));
        }

        let paths = get_path_to_certificate(file)?;
        let mut chain = load_certs(&paths.certificate)?;
        if let Some(bundle) = &paths.bundle {
            match load_certs(bundle) {
                Ok(intermediates) => chain.extend(intermediates),
                Err(HandshakeError::Read { source, .. })
                    if source.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        let key = load_key(&paths.key)?;

        let signing_key =
            rustls::crypto::ring::sign::any_supported_type(&key).map_err(HandshakeError::InvalidKey)?;
        let certified = CertifiedKey::new(chain, signing_key);
        match certified.keys_match() {
            // Unknown means the key type cannot be compared, not a mismatch.
            Ok(()) | Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => {}
            Err(err) => return Err(HandshakeError::InvalidKey(err)),
        }
        Ok(Arc::new(certified))
    }
}

impl ResolvesServerCert for CertificateResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(server_name) = client_hello.server_name() else {
            log(
                LogLevel::Warn,
                &HandshakeError::MissingServerName.to_string(),
            );
            return None;
        };

        match self.resolve_domain(server_name) {
            Ok(key) => Some(key),
            Err(err @ (HandshakeError::UnknownDomain(_) | HandshakeError::HttpsDisabled(_))) => {
                log(LogLevel::Debug, &format!("Handshake refused: {err}"));
                None
            }
            Err(err) => {
                log(
                    LogLevel::Error,
                    &format!("Failed to build TLS cert for {server_name}: {err}"),
                );
                None
            }
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>, HandshakeError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| HandshakeError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, HandshakeError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| HandshakeError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(HandshakeError::NoCertificates {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, HandshakeError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| HandshakeError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| HandshakeError::NoPrivateKey {
            path: path.to_path_buf(),
        })
}
