/* src/routing.rs */

use crate::error::ProxyError;
use crate::registry::Registry;
use axum::http::{HeaderMap, Uri, header};

const DEFAULT_HTTPS_PORT: u16 = 443;

/// Which listener accepted the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    Plain,
    Secure,
}

/// What to do with a request whose host is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Proxy to `127.0.0.1:port`.
    Forward { port: u16 },
    /// Send the client to the secure endpoint.
    Redirect { location: String },
}

/// The hostname a request is addressed to, without any port.
///
/// Checks `Host`, then the URI authority (HTTP/2), then `Origin`.
pub fn declared_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let from_header = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
    };

    let raw = from_header(header::HOST)
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .or_else(|| {
            from_header(header::ORIGIN)
                .map(|origin| origin.split_once("://").map_or(origin, |(_, rest)| rest))
        })?;
    let host = strip_port(raw.trim_end_matches('/'));
    (!host.is_empty()).then(|| host.to_owned())
}

fn strip_port(authority: &str) -> &str {
    if authority.starts_with('[') {
        return authority
            .find(']')
            .map_or(authority, |end| &authority[..=end]);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => authority,
    }
}

/// Decides between forwarding, redirecting and rejecting.
pub fn decide(
    registry: &Registry,
    host: &str,
    listener: Listener,
    https_port: u16,
    path_and_query: &str,
) -> Result<RouteDecision, ProxyError> {
    let file = registry
        .find(host)
        .ok_or_else(|| ProxyError::UnknownHost(host.to_owned()))?;
    let config = &file.config;

    if listener == Listener::Plain && !config.allow_http {
        if config.allow_https && config.redirect_to_https {
            return Ok(RouteDecision::Redirect {
                location: secure_location(&config.host_domain, https_port, path_and_query),
            });
        }
        return Err(ProxyError::HttpNotAllowed(host.to_owned()));
    }
    // SNI and Host can name different tenants on one TLS connection.
    if listener == Listener::Secure && !config.allow_https {
        return Err(ProxyError::HttpsNotAllowed(host.to_owned()));
    }

    let port = u16::try_from(config.inbound_port)
        .map_err(|_| ProxyError::Misconfigured(host.to_owned()))?;
    Ok(RouteDecision::Forward { port })
}

fn secure_location(host: &str, https_port: u16, path_and_query: &str) -> String {
    let path = if path_and_query.is_empty() {
        "/"
    } else {
        path_and_query
    };
    if https_port == DEFAULT_HTTPS_PORT {
        format!("https://{host}{path}")
    } else {
        format!("https://{host}:{https_port}{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfigFile, HostConfig};
    use axum::http::HeaderValue;

    fn registry() -> Registry {
        let plain = HostConfig::new("a.example", 3000);
        let mut redirecting = HostConfig::new("b.example", 4000);
        redirecting.allow_http = false;
        redirecting.allow_https = true;
        redirecting.redirect_to_https = true;
        let mut secure_only = HostConfig::new("s.example", 5000);
        secure_only.allow_http = false;
        secure_only.allow_https = true;
        Registry::from_files(
            [plain, redirecting, secure_only]
                .into_iter()
                .map(|config| ConfigFile::in_memory("/home/alice", config)),
        )
    }

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|(name, value)| (name.clone(), HeaderValue::from_static(value)))
            .collect()
    }

    #[test]
    fn host_header_wins_and_loses_its_port() {
        let map = headers(&[
            (header::HOST, "a.example:8080"),
            (header::ORIGIN, "https://other.example"),
        ]);
        assert_eq!(
            declared_host(&map, &Uri::from_static("/")),
            Some("a.example".to_owned())
        );
    }

    #[test]
    fn falls_back_to_authority_then_origin() {
        let uri = Uri::from_static("https://h2.example:8443/x");
        assert_eq!(
            declared_host(&HeaderMap::new(), &uri),
            Some("h2.example".to_owned())
        );

        let map = headers(&[(header::ORIGIN, "https://b.example:8443")]);
        assert_eq!(
            declared_host(&map, &Uri::from_static("/")),
            Some("b.example".to_owned())
        );
        assert_eq!(declared_host(&HeaderMap::new(), &Uri::from_static("/")), None);
    }

    #[test]
    fn ipv6_literals_keep_their_brackets() {
        let map = headers(&[(header::HOST, "[::1]:8080")]);
        assert_eq!(
            declared_host(&map, &Uri::from_static("/")),
            Some("[::1]".to_owned())
        );
    }

    #[test]
    fn plain_request_to_plain_tenant_forwards() {
        assert_eq!(
            decide(&registry(), "a.example", Listener::Plain, 443, "/").unwrap(),
            RouteDecision::Forward { port: 3000 }
        );
    }

    #[test]
    fn plain_request_redirects_to_secure_endpoint() {
        let registry = registry();
        assert_eq!(
            decide(&registry, "b.example", Listener::Plain, 443, "/p?q=1").unwrap(),
            RouteDecision::Redirect {
                location: "https://b.example/p?q=1".to_owned()
            }
        );
        assert_eq!(
            decide(&registry, "b.example", Listener::Plain, 8443, "").unwrap(),
            RouteDecision::Redirect {
                location: "https://b.example:8443/".to_owned()
            }
        );
        assert_eq!(
            decide(&registry, "b.example", Listener::Secure, 443, "/").unwrap(),
            RouteDecision::Forward { port: 4000 }
        );
    }

    #[test]
    fn plain_request_without_redirect_is_rejected() {
        assert!(matches!(
            decide(&registry(), "s.example", Listener::Plain, 443, "/"),
            Err(ProxyError::HttpNotAllowed(_))
        ));
    }

    #[test]
    fn secure_request_to_plaintext_tenant_is_rejected() {
        assert!(matches!(
            decide(&registry(), "a.example", Listener::Secure, 443, "/"),
            Err(ProxyError::HttpsNotAllowed(host)) if host == "a.example"
        ));
    }

    #[test]
    fn unknown_host_is_not_found() {
        assert!(matches!(
            decide(&registry(), "unknown.example", Listener::Plain, 443, "/"),
            Err(ProxyError::UnknownHost(_))
        ));
    }
}
