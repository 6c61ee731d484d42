/* src/server.rs */

use crate::{
    config::Settings,
    error::ListenerError,
    proxy,
    registry::Registry,
    routing::Listener,
    state::AppState,
    tls::CertificateResolver,
};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use fancy_log::{LogLevel, log};
use rustls::ServerConfig;
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    signal,
    task::{JoinError, JoinSet},
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Binds `addr` right away so privilege and address-in-use problems show up
/// before anything is served.
pub fn bind(addr: SocketAddr) -> Result<std::net::TcpListener, ListenerError> {
    let listener =
        std::net::TcpListener::bind(addr).map_err(|e| ListenerError::from_bind(addr, e))?;
    listener
        .set_nonblocking(true)
        .map_err(|source| ListenerError::Bind { addr, source })?;
    Ok(listener)
}

/// TLS settings for the secure listener: certificates come from SNI lookups.
pub fn tls_config(registry: Arc<Registry>) -> Result<RustlsConfig, ListenerError> {
    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(CertificateResolver::new(registry)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(RustlsConfig::from_config(Arc::new(config)))
}

/// Runs the plaintext and secure listeners until a shutdown signal or until
/// one of them fails.
pub async fn run(settings: &Settings, registry: Arc<Registry>) -> Result<(), ListenerError> {
    let plain_addr = SocketAddr::new(settings.bind_address, settings.http_port);
    let secure_addr = SocketAddr::new(settings.bind_address, settings.https_port);

    let plain = if settings.allow_incoming_http {
        Some(bind(plain_addr)?)
    } else {
        log(
            LogLevel::Info,
            "Incoming HTTP disabled, plaintext listener will not be started.",
        );
        None
    };
    let secure = if registry.serves_https() {
        Some((bind(secure_addr)?, tls_config(registry.clone())?))
    } else {
        log(
            LogLevel::Info,
            "No host allows HTTPS, secure listener will not be started.",
        );
        None
    };

    if plain.is_none() && secure.is_none() {
        log(LogLevel::Warn, "No listener to start, exiting.");
        return Ok(());
    }

    let state = AppState::new(registry, settings.https_port, Listener::Plain);
    let handle = Handle::new();
    let mut servers = JoinSet::new();

    if let Some(listener) = plain {
        let app = proxy::router(state.clone());
        let handle = handle.clone();
        log(
            LogLevel::Info,
            &format!("HTTP server listening on http://{plain_addr}"),
        );
        servers.spawn(async move {
            let result = axum_server::from_tcp(listener)
                .handle(handle)
                .serve(app.into_make_service())
                .await;
            ("HTTP", result)
        });
    }

    if let Some((listener, tls)) = secure {
        let app = proxy::router(state.for_listener(Listener::Secure));
        let handle = handle.clone();
        log(
            LogLevel::Info,
            &format!("HTTPS server listening on https://{secure_addr}"),
        );
        servers.spawn(async move {
            let result = axum_server::from_tcp_rustls(listener, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await;
            ("HTTPS", result)
        });
    }

    tokio::select! {
        () = shutdown_signal() => log(LogLevel::Info, "Signal received, shutting down."),
        Some(res) = servers.join_next() => handle_task_result(res),
    }

    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    while let Some(res) = servers.join_next().await {
        handle_task_result(res);
    }
    Ok(())
}

fn handle_task_result(res: Result<(&'static str, io::Result<()>), JoinError>) {
    match res {
        Ok((name, Ok(()))) => log(LogLevel::Info, &format!("{name} server exited normally.")),
        Ok((name, Err(e))) => log(LogLevel::Error, &format!("{name} server error: {e}")),
        Err(join_err) => log(
            LogLevel::Error,
            &format!("Server task join error: {join_err}"),
        ),
    }
}

/// Completes on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occupied_port_is_reported_as_in_use() {
        let first = bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        assert!(matches!(bind(addr), Err(ListenerError::AddrInUse { .. })));
    }

    #[test]
    fn tls_config_offers_h2_and_http1() {
        let config = tls_config(Arc::new(Registry::default())).unwrap();
        assert_eq!(
            config.get_inner().alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }
}
