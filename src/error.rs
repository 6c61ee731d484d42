/* src/error.rs */

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use fancy_log::{LogLevel, log};
use std::{io, net::SocketAddr, path::PathBuf};
use thiserror::Error;

/// Problems found while discovering, parsing or validating tenant configs.
///
/// Everything except `ReadHomeRoot` only excludes a single file (or a single
/// home directory) from the registry.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read directory '{}': {source}", .path.display())]
    ReadHomeRoot { path: PathBuf, source: io::Error },
    #[error("'{}' SKIPPED: no configuration folder found", .home.display())]
    NoConfigFolder { home: PathBuf },
    #[error("could not read configuration folder at '{}': {source}", .home.display())]
    ReadConfigFolder { home: PathBuf, source: io::Error },
    #[error("'{}' was previously mapped, but doesn't seem to be there anymore", .path.display())]
    ConfigVanished { path: PathBuf },
    #[error("failed to open previously mapped file '{}': {source}", .path.display())]
    ReadConfig { path: PathBuf, source: io::Error },
    #[error("'{}' could not be parsed as JSON: {source}", .path.display())]
    InvalidJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("option '{option}' must be {expected}")]
    WrongType {
        option: String,
        expected: &'static str,
    },
    #[error("option '{option}' is required")]
    MissingOption { option: String },
    #[error(
        "'allowHTTPS' is set, but neither 'autoGenerateCertificate' with 'certificateGenerationArguments' nor 'customCertificate' is configured"
    )]
    MissingCertificateSource,
    #[error(
        "'allowHTTPS' is set and both an auto-generated and a custom certificate are configured; keep only one"
    )]
    AmbiguousCertificateSource,
    #[error("option 'inboundPort' must be between 1024 and 65535, got {port}")]
    PortOutOfRange { port: u32 },
    #[error("both options 'allowHTTP' and 'allowHTTPS' are set to false")]
    NoProtocolAllowed,
    #[error("'allowHTTP' and 'redirectToHTTPS' cannot both be set to true")]
    RedirectWithHttp,
    #[error("'allowHTTPS' cannot be false when 'redirectToHTTPS' is true")]
    RedirectWithoutHttps,
    #[error("issuer country code '{country}' must have at most two letters")]
    CountryCodeTooLong { country: String },
    #[error("option '{option}' must not contain control characters")]
    ControlCharacter { option: &'static str },
    #[error("certificate validity must be a positive number of days, got {days}")]
    NonPositiveDays { days: i64 },
    #[error("'{option}' points at '{}', which does not exist", .path.display())]
    MissingFile { option: &'static str, path: PathBuf },
    #[error("host '{host}' is already served by '{}'", .first.display())]
    DuplicateHostDomain { host: String, first: PathBuf },
}

/// Failures while locating or generating certificate material.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("configuration for '{host}' has no certificate source")]
    NoCertificateSource { host: String },
    #[error("cannot generate a certificate for '{host}' without generation arguments")]
    MissingGenerationArguments { host: String },
    #[error("failed to {action} '{}': {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to start '{program}': {source}")]
    Spawn { program: String, source: io::Error },
    #[error("'{command}' exited with {}: {stderr}", .status.map_or_else(|| "a signal".to_owned(), |c| format!("status {c}")))]
    Tool {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

/// Reasons a TLS handshake is refused.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("client did not send a server name")]
    MissingServerName,
    #[error("no configuration for '{0}'")]
    UnknownDomain(String),
    #[error("HTTPS is not allowed for '{0}'")]
    HttpsDisabled(String),
    #[error(transparent)]
    Locate(#[from] CertificateError),
    #[error("failed to read '{}': {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("no certificate found in '{}'", .path.display())]
    NoCertificates { path: PathBuf },
    #[error("no private key found in '{}'", .path.display())]
    NoPrivateKey { path: PathBuf },
    #[error("unusable private key: {0}")]
    InvalidKey(rustls::Error),
}

/// Request-scoped failures; each one renders an error page.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Request carries neither a Host nor an Origin header")]
    MissingHost,
    #[error("No site is configured for '{0}'")]
    UnknownHost(String),
    #[error("HTTP is not allowed for '{0}', use HTTPS instead")]
    HttpNotAllowed(String),
    #[error("HTTPS is not allowed for '{0}', use HTTP instead")]
    HttpsNotAllowed(String),
    #[error("Site '{0}' is misconfigured")]
    Misconfigured(String),
    #[error("Backend unreachable: {0:#}")]
    BadGateway(anyhow::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingHost => StatusCode::BAD_REQUEST,
            Self::UnknownHost(_) => StatusCode::NOT_FOUND,
            Self::HttpNotAllowed(_) => StatusCode::FORBIDDEN,
            Self::HttpsNotAllowed(_) => StatusCode::MISDIRECTED_REQUEST,
            Self::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::BadGateway(_) | Self::Misconfigured(_) => {
                log(LogLevel::Error, &self.to_string());
            }
            _ => log(LogLevel::Debug, &format!("Rejected request: {self}")),
        }
        serve_status_page(status, &self.to_string())
    }
}

/// Errors that stop a listener from starting.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("permission denied binding {addr}; ports below 1024 need elevated privileges")]
    PermissionDenied { addr: SocketAddr },
    #[error("{addr} is already in use; stop the other server or pick another port")]
    AddrInUse { addr: SocketAddr },
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("failed to build TLS configuration: {0}")]
    Tls(#[from] rustls::Error),
}

impl ListenerError {
    pub fn from_bind(addr: SocketAddr, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { addr },
            io::ErrorKind::AddrInUse => Self::AddrInUse { addr },
            _ => Self::Bind { addr, source },
        }
    }
}

const STATUS_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{StatusCode}</title>
<style>
body { font-family: system-ui, sans-serif; margin: 15vh auto; max-width: 40rem; color: #333; }
h1 { font-size: 4rem; margin: 0; }
pre { white-space: pre-wrap; }
</style>
</head>
<body>
<h1>{StatusCode}</h1>
<pre>{ErrorText}</pre>
</body>
</html>
"#;

/// Renders the human-readable page for a failed request.
pub fn serve_status_page(status: StatusCode, message: &str) -> Response {
    let body = STATUS_PAGE
        .replace("{StatusCode}", status.as_str())
        .replace("{ErrorText}", &escape_html(message));
    (
        status,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
