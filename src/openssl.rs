/* src/openssl.rs */

use crate::error::CertificateError;
use async_trait::async_trait;
use fancy_log::{LogLevel, log};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Section of the request config holding the SAN extension.
pub const REQUEST_EXTENSIONS_SECTION: &str = "req_extensions";

/// One invocation of the external PKI tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PkiOperation {
    /// 2048-bit RSA private key.
    GenerateKey { key: PathBuf },
    SigningRequest {
        key: PathBuf,
        config: PathBuf,
        csr: PathBuf,
    },
    /// Signs `csr` with the CA, copying the SAN extension from `config`.
    Sign {
        csr: PathBuf,
        certificate: PathBuf,
        ca_certificate: PathBuf,
        ca_key: PathBuf,
        ca_serial: PathBuf,
        config: PathBuf,
        days: i64,
    },
}

impl PkiOperation {
    /// Command line arguments, in `openssl` syntax.
    pub fn args(&self) -> Vec<OsString> {
        match self {
            Self::GenerateKey { key } => {
                vec!["genrsa".into(), "-out".into(), key.into(), "2048".into()]
            }
            Self::SigningRequest { key, config, csr } => vec![
                "req".into(),
                "-new".into(),
                "-key".into(),
                key.into(),
                "-config".into(),
                config.into(),
                "-out".into(),
                csr.into(),
            ],
            Self::Sign {
                csr,
                certificate,
                ca_certificate,
                ca_key,
                ca_serial,
                config,
                days,
            } => vec![
                "x509".into(),
                "-req".into(),
                "-in".into(),
                csr.into(),
                "-out".into(),
                certificate.into(),
                "-CA".into(),
                ca_certificate.into(),
                "-CAkey".into(),
                ca_key.into(),
                "-CAserial".into(),
                ca_serial.into(),
                "-days".into(),
                days.to_string().into(),
                "-extfile".into(),
                config.into(),
                "-extensions".into(),
                REQUEST_EXTENSIONS_SECTION.into(),
            ],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GenerateKey { .. } => "genrsa",
            Self::SigningRequest { .. } => "req",
            Self::Sign { .. } => "x509",
        }
    }
}

/// Runs PKI operations. The generation pipeline only talks to this.
#[async_trait]
pub trait PkiTool: Send + Sync {
    /// Returns captured stdout on success.
    async fn run(&self, operation: &PkiOperation) -> Result<String, CertificateError>;
}

/// Drives the `openssl` command line tool as a child process.
#[derive(Debug, Clone)]
pub struct OpensslCommand {
    program: PathBuf,
}

impl OpensslCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for OpensslCommand {
    fn default() -> Self {
        Self::new("openssl")
    }
}

#[async_trait]
impl PkiTool for OpensslCommand {
    async fn run(&self, operation: &PkiOperation) -> Result<String, CertificateError> {
        let program = self.program.display().to_string();
        log(
            LogLevel::Debug,
            &format!("Running {program} {}", operation.name()),
        );
        let output = Command::new(&self.program)
            .args(operation.args())
            .output()
            .await
            .map_err(|source| CertificateError::Spawn {
                program: program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(CertificateError::Tool {
                command: format!("{program} {}", operation.name()),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_arguments_carry_days_and_extensions() {
        let op = PkiOperation::Sign {
            csr: PathBuf::from("/d/req.csr"),
            certificate: PathBuf::from("/d/certificate.crt"),
            ca_certificate: PathBuf::from("/ca/ca.crt"),
            ca_key: PathBuf::from("/ca/ca.key"),
            ca_serial: PathBuf::from("/ca/ca.srl"),
            config: PathBuf::from("/d/config.cnf"),
            days: 30,
        };
        let args: Vec<String> = op
            .args()
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            [
                "x509", "-req", "-in", "/d/req.csr", "-out", "/d/certificate.crt", "-CA",
                "/ca/ca.crt", "-CAkey", "/ca/ca.key", "-CAserial", "/ca/ca.srl", "-days", "30",
                "-extfile", "/d/config.cnf", "-extensions", "req_extensions",
            ]
        );
    }

    #[test]
    fn key_generation_is_2048_bit_rsa() {
        let op = PkiOperation::GenerateKey {
            key: PathBuf::from("/d/private.key"),
        };
        assert_eq!(
            op.args(),
            ["genrsa", "-out", "/d/private.key", "2048"]
                .map(OsString::from)
                .to_vec()
        );
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let tool = OpensslCommand::new("/nonexistent/openssl-binary");
        let result = tool
            .run(&PkiOperation::GenerateKey {
                key: PathBuf::from("/tmp/never.key"),
            })
            .await;
        assert!(matches!(result, Err(CertificateError::Spawn { .. })));
    }

    #[tokio::test]
    async fn failing_program_surfaces_stderr() {
        // `false` ignores its arguments and exits 1.
        let tool = OpensslCommand::new("false");
        let result = tool
            .run(&PkiOperation::GenerateKey {
                key: PathBuf::from("/tmp/never.key"),
            })
            .await;
        assert!(matches!(result, Err(CertificateError::Tool { status: Some(1), .. })));
    }
}
