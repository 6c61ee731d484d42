/* src/main.rs */

use anyhow::Result;
use dotenvy::dotenv;
use fancy_log::{LogLevel, log, set_log_level};
use sslproxy::{
    certgen::{self, CertificateGenerator},
    config::Settings,
    discovery::FsConfigSource,
    openssl::OpensslCommand,
    registry, server,
};
use std::{env, sync::Arc};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    let log_level = match level.to_lowercase().as_str() {
        "debug" => LogLevel::Debug,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    };
    set_log_level(log_level);

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            log(LogLevel::Error, &format!("{e:#}"));
            std::process::exit(1);
        }
    };

    let source = FsConfigSource::new(&settings.home_root);
    let registry = match registry::load(&source).await {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            log(
                LogLevel::Error,
                &format!("Failed to load host configurations: {e}"),
            );
            std::process::exit(1);
        }
    };
    if registry.is_empty() {
        log(
            LogLevel::Warn,
            &format!(
                "No host configurations found under {}/*/.web-servers.",
                settings.home_root.display()
            ),
        );
    }

    let generator = CertificateGenerator::new(OpensslCommand::new(&settings.openssl));
    certgen::provision_all(&registry, &generator).await;

    if let Err(e) = server::run(&settings, registry).await {
        log(LogLevel::Error, &format!("{e}"));
        std::process::exit(1);
    }
    Ok(())
}
