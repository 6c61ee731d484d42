/* src/proxy.rs */

use crate::{
    error::ProxyError,
    routing::{self, RouteDecision},
    state::AppState,
};
use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, Uri, Version, header},
    response::{IntoResponse, Response},
};
use fancy_log::{LogLevel, log};

/// A router sending every request through [`proxy_handler`].
pub fn router(state: AppState) -> Router {
    Router::new().fallback(proxy_handler).with_state(state)
}

pub async fn proxy_handler(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Result<Response, ProxyError> {
    let host = routing::declared_host(req.headers(), req.uri()).ok_or(ProxyError::MissingHost)?;
    let path_and_query = req
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_owned();

    match routing::decide(
        &state.registry,
        &host,
        state.listener,
        state.https_port,
        &path_and_query,
    )? {
        RouteDecision::Redirect { location } => {
            log(
                LogLevel::Debug,
                &format!("Redirecting {host}{path_and_query} to {location}"),
            );
            redirect(&host, location)
        }
        RouteDecision::Forward { port } => {
            forward(&state, req, &host, port, &path_and_query).await
        }
    }
}

fn redirect(host: &str, location: String) -> Result<Response, ProxyError> {
    let location =
        HeaderValue::try_from(location).map_err(|_| ProxyError::Misconfigured(host.to_owned()))?;
    Ok((
        StatusCode::MOVED_PERMANENTLY,
        [
            (header::LOCATION, location),
            (header::CONNECTION, HeaderValue::from_static("close")),
        ],
    )
        .into_response())
}

async fn forward(
    state: &AppState,
    req: Request<Body>,
    host: &str,
    port: u16,
    path_and_query: &str,
) -> Result<Response, ProxyError> {
    let target = format!("http://127.0.0.1:{port}{path_and_query}");
    let target_uri: Uri = target
        .parse()
        .map_err(|e| ProxyError::BadGateway(anyhow::anyhow!("Invalid target URL '{target}': {e}")))?;

    let (mut parts, body) = req.into_parts();
    if !parts.headers.contains_key(header::HOST) {
        if let Ok(value) = HeaderValue::from_str(host) {
            parts.headers.insert(header::HOST, value);
        }
    }
    parts.uri = target_uri;
    parts.version = Version::HTTP_11;

    log(
        LogLevel::Debug,
        &format!("Proxying request for {host} to {target}"),
    );
    match state
        .http_client
        .request(Request::from_parts(parts, body))
        .await
    {
        Ok(response) => Ok(response.map(Body::new)),
        Err(e) => Err(ProxyError::BadGateway(
            anyhow::Error::new(e).context(format!("Connection to {target} failed")),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfigFile, HostConfig};
    use crate::registry::Registry;
    use crate::routing::Listener;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state(listener: Listener, configs: Vec<HostConfig>) -> AppState {
        let registry = Registry::from_files(
            configs
                .into_iter()
                .map(|config| ConfigFile::in_memory("/home/alice", config)),
        );
        AppState::new(Arc::new(registry), 443, listener)
    }

    fn request(host: Option<&str>, path: &str) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(host) = host {
            builder = builder.header(header::HOST, host);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn missing_host_is_a_bad_request() {
        let app = router(state(Listener::Plain, Vec::new()));
        let response = app.oneshot(request(None, "/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_host_renders_not_found_page() {
        let app = router(state(Listener::Plain, Vec::new()));
        let response = app
            .oneshot(request(Some("unknown.example"), "/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("unknown.example"));
    }

    #[tokio::test]
    async fn redirect_has_location_and_closes_connection() {
        let mut config = HostConfig::new("b.example", 4000);
        config.allow_http = false;
        config.allow_https = true;
        config.redirect_to_https = true;
        let app = router(state(Listener::Plain, vec![config]));

        let response = app
            .oneshot(request(Some("b.example"), "/login?next=%2F"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://b.example/login?next=%2F"
        );
        assert_eq!(response.headers()[header::CONNECTION], "close");
        assert!(body_text(response).await.is_empty());
    }

    #[tokio::test]
    async fn closed_backend_is_a_bad_gateway() {
        // Reserve a port, then free it so nothing listens there.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let app = router(state(
            Listener::Plain,
            vec![HostConfig::new("a.example", u32::from(port))],
        ));

        let response = app.oneshot(request(Some("a.example"), "/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(body_text(response).await.contains("Connection to http://127.0.0.1:"));
    }
}
