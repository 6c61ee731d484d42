/* src/config.rs */

use anyhow::{Context, Result};
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;

/// Process-level settings, read once from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub http_port: u16,
    pub https_port: u16,
    /// `false` only when `ALLOW_INCOMING_HTTP` is literally `false`.
    pub allow_incoming_http: bool,
    pub bind_address: IpAddr,
    /// Directory whose subdirectories are scanned as tenant homes.
    pub home_root: PathBuf,
    pub openssl: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_port: 80,
            https_port: 443,
            allow_incoming_http: true,
            bind_address: IpAddr::from([0, 0, 0, 0]),
            home_root: PathBuf::from("/home"),
            openssl: PathBuf::from("openssl"),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let http_port = match lookup("SSLPROXY_HTTP_LISTEN_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .context("Invalid SSLPROXY_HTTP_LISTEN_PORT")?,
            None => defaults.http_port,
        };
        let https_port = match lookup("SSLPROXY_HTTPS_LISTEN_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .context("Invalid SSLPROXY_HTTPS_LISTEN_PORT")?,
            None => defaults.https_port,
        };
        let bind_address = match lookup("SSLPROXY_BIND_ADDRESS") {
            Some(raw) => raw
                .parse::<IpAddr>()
                .context("Invalid SSLPROXY_BIND_ADDRESS")?,
            None => defaults.bind_address,
        };

        Ok(Self {
            http_port,
            https_port,
            allow_incoming_http: lookup("ALLOW_INCOMING_HTTP").as_deref() != Some("false"),
            bind_address,
            home_root: lookup("SSLPROXY_HOME_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.home_root),
            openssl: lookup("SSLPROXY_OPENSSL")
                .map(PathBuf::from)
                .unwrap_or(defaults.openssl),
        })
    }
}
