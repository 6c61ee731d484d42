/* src/models.rs */

use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_CERTIFICATE_DAYS: i64 = 180;

/// Subject fields embedded in every generated certificate.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerInformation {
    /// Two-letter country code, e.g. `BR`.
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub organization: Option<String>,
    pub organization_unit: Option<String>,
    pub email_address: Option<String>,
    pub common_name: Option<String>,
}

/// The CA used to sign generated certificates. Never written to.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAuthority {
    pub certificate_location: PathBuf,
    pub key_location: PathBuf,
    /// Serial counter file handed to the PKI tool.
    pub serial_location: PathBuf,
    /// Upstream chain, concatenated in order ahead of the CA certificate.
    pub path_to_certificate_chain: Option<Vec<PathBuf>>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateGenerationArguments {
    /// Root directory; each domain gets its own subdirectory below it.
    pub certificate_generation_location: PathBuf,
    pub days: Option<i64>,
    pub certificate_authority: CertificateAuthority,
    pub issuer_information: Option<IssuerInformation>,
}

impl CertificateGenerationArguments {
    pub fn days(&self) -> i64 {
        self.days.unwrap_or(DEFAULT_CERTIFICATE_DAYS)
    }
}

/// An operator-supplied certificate.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomCertificate {
    pub certificate_location: PathBuf,
    pub private_key_location: PathBuf,
    #[serde(rename = "CABundle")]
    pub ca_bundle: Option<PathBuf>,
}

/// Routing and TLS policy for one tenant domain.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    pub host_domain: String,
    /// Backend port on the loopback interface.
    pub inbound_port: u32,
    #[serde(rename = "allowHTTP", default = "default_true")]
    pub allow_http: bool,
    #[serde(rename = "allowHTTPS", default)]
    pub allow_https: bool,
    #[serde(rename = "redirectToHTTPS", default)]
    pub redirect_to_https: bool,
    #[serde(rename = "synchronizeNetlifyDNS", default)]
    pub synchronize_netlify_dns: bool,
    #[serde(default)]
    pub auto_generate_certificate: bool,
    pub certificate_generation_arguments: Option<CertificateGenerationArguments>,
    pub custom_certificate: Option<CustomCertificate>,
}

impl HostConfig {
    /// Minimal plaintext-only config, mostly useful for building registries in tests.
    pub fn new(host_domain: impl Into<String>, inbound_port: u32) -> Self {
        Self {
            host_domain: host_domain.into(),
            inbound_port,
            allow_http: true,
            allow_https: false,
            redirect_to_https: false,
            synchronize_netlify_dns: false,
            auto_generate_certificate: false,
            certificate_generation_arguments: None,
            custom_certificate: None,
        }
    }

    /// Generation arguments, only when auto-generation is switched on.
    pub fn generation(&self) -> Option<&CertificateGenerationArguments> {
        if self.auto_generate_certificate {
            self.certificate_generation_arguments.as_ref()
        } else {
            None
        }
    }
}

fn default_true() -> bool {
    true
}

/// A `HostConfig` together with where it was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub home_path: PathBuf,
    pub config: HostConfig,
    pub config_directory_path: PathBuf,
    pub config_path: PathBuf,
    pub config_file_name: String,
}

impl ConfigFile {
    /// Wraps a config as if it had been read from `<home>/.web-servers/<domain>.json`.
    pub fn in_memory(home_path: impl Into<PathBuf>, config: HostConfig) -> Self {
        let home_path = home_path.into();
        let config_directory_path = home_path.join(crate::discovery::CONFIG_FOLDER_NAME);
        let config_file_name = format!("{}.json", config.host_domain);
        Self {
            config_path: config_directory_path.join(&config_file_name),
            home_path,
            config,
            config_directory_path,
            config_file_name,
        }
    }

    pub fn host_domain(&self) -> &str {
        &self.config.host_domain
    }
}
