/* src/certgen.rs */

use crate::error::CertificateError;
use crate::locator::{CertificatePaths, get_path_to_certificate};
use crate::models::{CertificateGenerationArguments, ConfigFile, IssuerInformation};
use crate::openssl::{PkiOperation, PkiTool, REQUEST_EXTENSIONS_SECTION};
use crate::registry::Registry;
use fancy_log::{LogLevel, log};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use tokio::fs;

const REQUEST_CONFIG_FILE_NAME: &str = "config.cnf";
const SIGNING_REQUEST_FILE_NAME: &str = "certSignRequest.csr";
const UNKNOWN: &str = "unknown";

/// Outcome of startup provisioning for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    AlreadyPresent,
    Generated,
}

/// Produces CA-signed leaf certificates by driving a [`PkiTool`].
#[derive(Debug, Clone)]
pub struct CertificateGenerator<T> {
    tool: T,
}

impl<T: PkiTool> CertificateGenerator<T> {
    pub fn new(tool: T) -> Self {
        Self { tool }
    }

    /// Generates key, certificate and (with a configured chain) CA bundle for
    /// one domain.
    ///
    /// Does not look for existing output first and will overwrite it; callers
    /// check with [`certificate_exists`] before invoking.
    pub async fn generate(&self, file: &ConfigFile) -> Result<CertificatePaths, CertificateError> {
        let host = file.host_domain();
        let arguments = file.config.generation().ok_or_else(|| {
            CertificateError::MissingGenerationArguments {
                host: host.to_owned(),
            }
        })?;
        let paths = get_path_to_certificate(file)?;
        let directory = paths
            .directory()
            .map(Path::to_path_buf)
            .ok_or_else(|| CertificateError::NoCertificateSource {
                host: host.to_owned(),
            })?;
        let config_path = directory.join(REQUEST_CONFIG_FILE_NAME);
        let csr_path = directory.join(SIGNING_REQUEST_FILE_NAME);

        log(
            LogLevel::Info,
            &format!(
                "Generating certificate for {host} at {}...",
                directory.display()
            ),
        );

        let result = self
            .run_steps(host, arguments, &paths, &config_path, &csr_path)
            .await;
        remove_transient(&[config_path, csr_path]).await;

        match &result {
            Ok(()) => log(LogLevel::Info, &format!("Certificate for {host} done.")),
            Err(err) => log(
                LogLevel::Error,
                &format!("Certificate generation for {host} failed: {err}"),
            ),
        }
        result.map(|()| paths)
    }

    async fn run_steps(
        &self,
        host: &str,
        arguments: &CertificateGenerationArguments,
        paths: &CertificatePaths,
        config_path: &Path,
        csr_path: &Path,
    ) -> Result<(), CertificateError> {
        let authority = &arguments.certificate_authority;

        if let Some(directory) = paths.directory() {
            fs::create_dir_all(directory)
                .await
                .map_err(|source| CertificateError::Io {
                    action: "create",
                    path: directory.to_path_buf(),
                    source,
                })?;
        }

        let request_config = request_config(host, arguments.issuer_information.as_ref());
        write(config_path, request_config.as_bytes()).await?;

        self.tool
            .run(&PkiOperation::GenerateKey {
                key: paths.key.clone(),
            })
            .await?;
        self.tool
            .run(&PkiOperation::SigningRequest {
                key: paths.key.clone(),
                config: config_path.to_path_buf(),
                csr: csr_path.to_path_buf(),
            })
            .await?;
        self.tool
            .run(&PkiOperation::Sign {
                csr: csr_path.to_path_buf(),
                certificate: paths.certificate.clone(),
                ca_certificate: authority.certificate_location.clone(),
                ca_key: authority.key_location.clone(),
                ca_serial: authority.serial_location.clone(),
                config: config_path.to_path_buf(),
                days: arguments.days(),
            })
            .await?;

        if let (Some(chain), Some(bundle)) = (&authority.path_to_certificate_chain, &paths.bundle)
        {
            let members: Vec<&Path> = chain
                .iter()
                .map(PathBuf::as_path)
                .chain(std::iter::once(authority.certificate_location.as_path()))
                .collect();
            write_bundle(bundle, &members).await?;
        }
        Ok(())
    }
}

/// The `openssl req` config: subject fields plus a SAN for `domain`.
pub fn request_config(domain: &str, issuer: Option<&IssuerInformation>) -> String {
    let issuer = issuer.cloned().unwrap_or_default();
    let field = |value: &Option<String>, fallback: &'static str| {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(fallback)
            .to_owned()
    };

    format!(
        "[req]
prompt = no
utf8 = yes
req_extensions = {REQUEST_EXTENSIONS_SECTION}
distinguished_name = req_distinguished_name

[req_distinguished_name]
C={country}
ST={state}
L={city}
O={organization}
OU={organization_unit}
CN={common_name}
emailAddress={email}

[{REQUEST_EXTENSIONS_SECTION}]
subjectAltName = @alt_names

[alt_names]
DNS.1 = {domain}
",
        country = field(&issuer.country, "00"),
        state = field(&issuer.state, UNKNOWN),
        city = field(&issuer.city, UNKNOWN),
        organization = field(&issuer.organization, UNKNOWN),
        organization_unit = field(&issuer.organization_unit, UNKNOWN),
        common_name = field(&issuer.common_name, UNKNOWN),
        email = field(&issuer.email_address, UNKNOWN),
    )
}

/// True when both the certificate and the key are on disk.
pub async fn certificate_exists(paths: &CertificatePaths) -> bool {
    let (certificate, key) = tokio::join!(fs::metadata(&paths.certificate), fs::metadata(&paths.key));
    certificate.is_ok() && key.is_ok()
}

/// Generates missing certificates for every HTTPS tenant that asks for one.
///
/// Domains are handled concurrently and independently; failures are logged
/// and returned, never propagated.
pub async fn provision_all<T: PkiTool>(
    registry: &Registry,
    generator: &CertificateGenerator<T>,
) -> Vec<(String, Result<Provisioned, CertificateError>)> {
    let pending = registry
        .files()
        .iter()
        .filter(|f| f.config.allow_https && f.config.generation().is_some())
        .map(|file| async move {
            let outcome = provision(file, generator).await;
            (file.config.host_domain.clone(), outcome)
        });
    join_all(pending).await
}

async fn provision<T: PkiTool>(
    file: &ConfigFile,
    generator: &CertificateGenerator<T>,
) -> Result<Provisioned, CertificateError> {
    let paths = get_path_to_certificate(file)?;
    if certificate_exists(&paths).await {
        log(
            LogLevel::Info,
            &format!(
                "Certificate for '{}' already exists. Skipping generation.",
                file.host_domain()
            ),
        );
        return Ok(Provisioned::AlreadyPresent);
    }
    generator.generate(file).await?;
    Ok(Provisioned::Generated)
}

async fn write(path: &Path, contents: &[u8]) -> Result<(), CertificateError> {
    fs::write(path, contents)
        .await
        .map_err(|source| CertificateError::Io {
            action: "write",
            path: path.to_path_buf(),
            source,
        })
}

async fn write_bundle(bundle: &Path, members: &[&Path]) -> Result<(), CertificateError> {
    let mut contents = String::new();
    for member in members {
        let pem = fs::read_to_string(member)
            .await
            .map_err(|source| CertificateError::Io {
                action: "read",
                path: member.to_path_buf(),
                source,
            })?;
        contents.push_str(&pem);
    }
    write(bundle, contents.as_bytes()).await
}

async fn remove_transient(paths: &[PathBuf]) {
    let removals = join_all(paths.iter().map(fs::remove_file)).await;
    for (path, result) in paths.iter().zip(removals) {
        match result {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => log(
                LogLevel::Warn,
                &format!("Could not remove '{}': {err}", path.display()),
            ),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CertificateAuthority, HostConfig};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Writes placeholder output files and records what it was asked to do.
    #[derive(Default)]
    struct FakePki {
        calls: Mutex<Vec<PkiOperation>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl PkiTool for FakePki {
        async fn run(&self, operation: &PkiOperation) -> Result<String, CertificateError> {
            self.calls.lock().unwrap().push(operation.clone());
            if self.fail_on == Some(operation.name()) {
                return Err(CertificateError::Tool {
                    command: format!("openssl {}", operation.name()),
                    status: Some(1),
                    stderr: "unable to load CA private key".to_owned(),
                });
            }
            let (out, body) = match operation {
                PkiOperation::GenerateKey { key } => (key, "KEY".to_owned()),
                PkiOperation::SigningRequest { csr, config, .. } => {
                    assert!(config.exists(), "request config must exist before req");
                    (csr, "CSR".to_owned())
                }
                PkiOperation::Sign { certificate, days, .. } => {
                    (certificate, format!("CERT days={days}"))
                }
            };
            std::fs::write(out, body).unwrap();
            Ok(String::new())
        }
    }

    fn tenant(root: &Path, chain: Option<Vec<PathBuf>>) -> ConfigFile {
        let ca = root.join("ca");
        std::fs::create_dir_all(&ca).unwrap();
        std::fs::write(ca.join("ca.crt"), "CA-CERT\n").unwrap();
        let mut config = HostConfig::new("a.example", 3000);
        config.allow_https = true;
        config.auto_generate_certificate = true;
        config.certificate_generation_arguments = Some(CertificateGenerationArguments {
            certificate_generation_location: root.join("generated"),
            days: Some(90),
            certificate_authority: CertificateAuthority {
                certificate_location: ca.join("ca.crt"),
                key_location: ca.join("ca.key"),
                serial_location: ca.join("ca.srl"),
                path_to_certificate_chain: chain,
            },
            issuer_information: Some(IssuerInformation {
                country: Some("BR".to_owned()),
                organization: Some("Acme".to_owned()),
                ..IssuerInformation::default()
            }),
        });
        ConfigFile::in_memory(root, config)
    }

    #[test]
    fn request_config_fills_placeholders() {
        let text = request_config("a.example", None);
        assert!(text.contains("C=00\n"));
        assert!(text.contains("ST=unknown\n"));
        assert!(text.contains("emailAddress=unknown\n"));
        assert!(text.contains("DNS.1 = a.example\n"));
        assert!(text.contains("req_extensions = req_extensions\n"));

        let issuer = IssuerInformation {
            country: Some("BR".to_owned()),
            common_name: Some(String::new()),
            ..IssuerInformation::default()
        };
        let text = request_config("b.example", Some(&issuer));
        assert!(text.contains("C=BR\n"));
        assert!(text.contains("CN=unknown\n"));
    }

    #[tokio::test]
    async fn runs_steps_in_order_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let file = tenant(root.path(), None);
        let generator = CertificateGenerator::new(FakePki::default());

        let paths = generator.generate(&file).await.unwrap();
        let names: Vec<&str> = generator
            .tool
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(PkiOperation::name)
            .collect();
        assert_eq!(names, ["genrsa", "req", "x509"]);

        let directory = root.path().join("generated/a.example");
        assert_eq!(std::fs::read_to_string(&paths.certificate).unwrap(), "CERT days=90");
        assert!(paths.key.exists());
        assert!(!directory.join(REQUEST_CONFIG_FILE_NAME).exists());
        assert!(!directory.join(SIGNING_REQUEST_FILE_NAME).exists());
        assert!(!directory.join("CABundle.crt").exists());
    }

    #[tokio::test]
    async fn bundles_chain_then_ca() {
        let root = tempfile::tempdir().unwrap();
        let chain_root = root.path().join("root.crt");
        let chain_mid = root.path().join("intermediate.crt");
        std::fs::write(&chain_root, "ROOT\n").unwrap();
        std::fs::write(&chain_mid, "MID\n").unwrap();
        let file = tenant(root.path(), Some(vec![chain_root, chain_mid]));

        let paths = CertificateGenerator::new(FakePki::default())
            .generate(&file)
            .await
            .unwrap();
        let bundle = std::fs::read_to_string(paths.bundle.unwrap()).unwrap();
        assert_eq!(bundle, "ROOT\nMID\nCA-CERT\n");
    }

    #[tokio::test]
    async fn failing_step_stops_pipeline_with_diagnostic() {
        let root = tempfile::tempdir().unwrap();
        let file = tenant(root.path(), None);
        let generator = CertificateGenerator::new(FakePki {
            fail_on: Some("x509"),
            ..FakePki::default()
        });

        let err = generator.generate(&file).await.unwrap_err();
        assert!(err.to_string().contains("unable to load CA private key"));
        let directory = root.path().join("generated/a.example");
        assert!(!directory.join("certificate.crt").exists());
        assert!(!directory.join(REQUEST_CONFIG_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn refuses_configs_without_generation() {
        let file = ConfigFile::in_memory("/home/x", HostConfig::new("plain.example", 3000));
        let err = CertificateGenerator::new(FakePki::default())
            .generate(&file)
            .await
            .unwrap_err();
        assert!(matches!(err, CertificateError::MissingGenerationArguments { .. }));
    }

    #[tokio::test]
    async fn reinvocation_regenerates_unconditionally() {
        let root = tempfile::tempdir().unwrap();
        let file = tenant(root.path(), None);
        let generator = CertificateGenerator::new(FakePki::default());
        let paths = generator.generate(&file).await.unwrap();
        std::fs::write(&paths.certificate, "ORIGINAL").unwrap();

        generator.generate(&file).await.unwrap();
        assert_eq!(std::fs::read_to_string(&paths.certificate).unwrap(), "CERT days=90");
        assert_eq!(generator.tool.calls.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn provisioning_honours_existing_output() {
        let root = tempfile::tempdir().unwrap();
        let file = tenant(root.path(), None);
        let registry = Registry::from_files(vec![file.clone()]);
        let generator = CertificateGenerator::new(FakePki::default());

        let first = provision_all(&registry, &generator).await;
        assert_eq!(first.len(), 1);
        assert!(matches!(first[0].1, Ok(Provisioned::Generated)));

        let paths = get_path_to_certificate(&file).unwrap();
        std::fs::write(&paths.certificate, "KEEP ME").unwrap();
        let second = provision_all(&registry, &generator).await;
        assert!(matches!(second[0].1, Ok(Provisioned::AlreadyPresent)));
        assert_eq!(std::fs::read_to_string(&paths.certificate).unwrap(), "KEEP ME");
        assert_eq!(generator.tool.calls.lock().unwrap().len(), 3);
    }
}
