/* src/state.rs */

use crate::registry::Registry;
use crate::routing::Listener;
use axum::body::Body;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;

pub type HttpClient = Client<HttpConnector, Body>;

/// Shared by every request on one listener.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub http_client: HttpClient,
    /// Port the secure listener is reachable on, used in redirects.
    pub https_port: u16,
    pub listener: Listener,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, https_port: u16, listener: Listener) -> Self {
        let http_client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            registry,
            http_client,
            https_port,
            listener,
        }
    }

    /// The same registry and connection pool, seen from another listener.
    pub fn for_listener(&self, listener: Listener) -> Self {
        Self {
            listener,
            ..self.clone()
        }
    }
}
