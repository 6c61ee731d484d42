/* src/locator.rs */

use crate::error::CertificateError;
use crate::models::ConfigFile;
use std::path::{Path, PathBuf};

pub const KEY_FILE_NAME: &str = "private.key";
pub const CERTIFICATE_FILE_NAME: &str = "certificate.crt";
pub const BUNDLE_FILE_NAME: &str = "CABundle.crt";

/// Where a domain's key, certificate and optional CA bundle live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub certificate: PathBuf,
    pub key: PathBuf,
    pub bundle: Option<PathBuf>,
}

impl CertificatePaths {
    /// Layout of a generated certificate directory.
    pub fn generated(directory: &Path) -> Self {
        Self {
            certificate: directory.join(CERTIFICATE_FILE_NAME),
            key: directory.join(KEY_FILE_NAME),
            bundle: Some(directory.join(BUNDLE_FILE_NAME)),
        }
    }

    /// Directory holding the certificate; for generated ones this is the
    /// per-domain subdirectory.
    pub fn directory(&self) -> Option<&Path> {
        self.key.parent()
    }
}

/// Auto-generation wins over a custom certificate when both are configured.
pub fn get_path_to_certificate(file: &ConfigFile) -> Result<CertificatePaths, CertificateError> {
    let config = &file.config;
    if let Some(arguments) = config.generation() {
        let directory = arguments
            .certificate_generation_location
            .join(&config.host_domain);
        return Ok(CertificatePaths::generated(&directory));
    }
    if let Some(custom) = &config.custom_certificate {
        return Ok(CertificatePaths {
            certificate: custom.certificate_location.clone(),
            key: custom.private_key_location.clone(),
            bundle: custom.ca_bundle.clone(),
        });
    }
    Err(CertificateError::NoCertificateSource {
        host: config.host_domain.clone(),
    })
}
