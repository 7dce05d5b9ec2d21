//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, outer timeout)
//! - Dispatch `/proxy` and `/cors-proxy` calls into the pipeline
//! - Swap in a fresh fetcher when configuration reloads
//! - Serve plain TCP or TLS with graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Query, State},
    http::{Method, Request},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::health::health;
use crate::http::request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
use crate::http::response::{not_found_response, preflight_response};
use crate::observability::metrics;
use crate::proxy::{self, Fetcher, ProxyRequest};
use crate::security::headers::expose_all_headers;

/// Slack on top of the upstream timeout before the outer layer gives up.
const REQUEST_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Grace period for in-flight TLS connections on shutdown.
const TLS_DRAIN: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Everything that changes on reload.
struct InnerState {
    config: ProxyConfig,
    fetcher: Arc<Fetcher>,
}

impl InnerState {
    fn build(config: ProxyConfig) -> Result<Self, reqwest::Error> {
        let fetcher = Arc::new(Fetcher::new(&config.upstream)?);
        Ok(Self { config, fetcher })
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<ArcSwap<InnerState>>,
}

impl AppState {
    fn new(inner: InnerState) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(inner)),
        }
    }

    /// Fetcher currently in use.
    pub fn fetcher(&self) -> Arc<Fetcher> {
        self.inner.load().fetcher.clone()
    }

    pub fn config(&self) -> ProxyConfig {
        self.inner.load().config.clone()
    }

    /// Swap in a fetcher for `config`. The fetch slot pool is carried over
    /// so fetches still running on the old fetcher keep counting.
    fn reload(&self, config: ProxyConfig) -> Result<(), reqwest::Error> {
        let limiter = self.inner.load().fetcher.limiter().clone();
        let fetcher = Fetcher::with_limiter(&config.upstream, limiter.clone())?;
        limiter.resize(config.upstream.max_concurrent_fetches);
        self.inner.store(Arc::new(InnerState {
            config,
            fetcher: Arc::new(fetcher),
        }));
        Ok(())
    }
}

/// HTTP server for the embedding proxy.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let timeout = config.upstream.timeout() + REQUEST_TIMEOUT_SLACK;
        let state = AppState::new(InnerState::build(config)?);
        let router = Self::build_router(timeout, state.clone());
        Ok(Self { router, state })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(timeout: Duration, state: AppState) -> Router {
        let layers = ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    tracing::info_span!(
                        "request",
                        request_id = %request.request_id(),
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                }),
            )
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TimeoutLayer::new(timeout));

        Router::new()
            .route("/health", get(health))
            .route("/proxy", get(proxy_handler).options(preflight_handler))
            .route("/cors-proxy", get(cors_proxy_handler).options(preflight_handler))
            .fallback(fallback_handler)
            .with_state(state)
            .layer(layers)
    }

    /// Router with all layers, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        tokio::spawn(apply_reloads(self.state.clone(), config_updates));

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server over TLS.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        tracing::info!(address = %addr, "HTTPS server starting");

        tokio::spawn(apply_reloads(self.state.clone(), config_updates));

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Shutdown signal received");
            drain.graceful_shutdown(Some(TLS_DRAIN));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

async fn apply_reloads(state: AppState, mut updates: mpsc::UnboundedReceiver<ProxyConfig>) {
    while let Some(config) = updates.recv().await {
        let timeout_secs = config.upstream.timeout_secs;
        match state.reload(config) {
            Ok(()) => tracing::info!(timeout_secs, "Upstream settings reloaded"),
            Err(e) => tracing::error!(error = %e, "Reload rejected, keeping previous settings"),
        }
    }
}

async fn proxy_handler(
    State(state): State<AppState>,
    query: Result<Query<ProxyRequest>, QueryRejection>,
) -> Response {
    handle_proxy(&state, "proxy", query.map(|Query(q)| q)).await
}

/// Raw mode plus `Access-Control-Expose-Headers: *`.
async fn cors_proxy_handler(
    State(state): State<AppState>,
    query: Result<Query<ProxyRequest>, QueryRejection>,
) -> Response {
    let query = query.map(|Query(mut q)| {
        q.format = Some("raw".to_string());
        q
    });
    let mut response = handle_proxy(&state, "cors-proxy", query).await;
    expose_all_headers(response.headers_mut());
    response
}

async fn handle_proxy(
    state: &AppState,
    route: &'static str,
    query: Result<ProxyRequest, QueryRejection>,
) -> Response {
    let start = Instant::now();

    let result = match query {
        Ok(request) => {
            let inner = state.inner.load_full();
            proxy::execute(&inner.fetcher, &inner.config.rewrite, &request).await
        }
        Err(rejection) => Err(ProxyError::InvalidUrl(rejection.body_text())),
    };

    let response = match result {
        Ok(reply) => {
            tracing::info!(status = %reply.status, bytes = reply.body.len(), "Proxied");
            reply.into_response()
        }
        Err(e) if e.is_validation() => {
            tracing::debug!(kind = e.kind(), error = %e, "Rejected");
            e.into_response()
        }
        Err(e) => {
            tracing::warn!(kind = e.kind(), error = %e, "Upstream failure");
            e.into_response()
        }
    };

    metrics::record_request(route, response.status().as_u16(), start);
    response
}

async fn preflight_handler() -> Response {
    preflight_response()
}

async fn fallback_handler(method: Method) -> Response {
    if method == Method::OPTIONS {
        preflight_response()
    } else {
        not_found_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    fn server() -> HttpServer {
        HttpServer::new(ProxyConfig::default()).unwrap()
    }

    async fn send(router: Router, method: Method, uri: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        router.oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn options_anywhere_is_preflight() {
        let server = server();
        for path in ["/proxy", "/cors-proxy", "/anything/else"] {
            let response = send(server.router(), Method::OPTIONS, path).await;
            assert_eq!(response.status(), StatusCode::OK, "{path}");
            assert_eq!(response.headers()["access-control-allow-origin"], "*");
        }
        assert_eq!(server.state().fetcher().fetch_count(), 0);
    }

    #[tokio::test]
    async fn every_response_has_request_id() {
        let server = server();
        let response = send(server.router(), Method::GET, "/health").await;
        assert!(response.headers().contains_key("x-request-id"));

        let request = Request::builder()
            .uri("/nowhere")
            .header("x-request-id", "caller-42")
            .body(Body::empty())
            .unwrap();
        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-request-id"], "caller-42");
    }

    #[tokio::test]
    async fn cors_proxy_errors_expose_headers() {
        let server = server();
        let response = send(server.router(), Method::GET, "/cors-proxy").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["access-control-expose-headers"], "*");
    }

    #[tokio::test]
    async fn reload_swaps_fetcher() {
        let server = server();
        let before = server.state().fetcher();

        let mut config = ProxyConfig::default();
        config.upstream.timeout_secs = 3;
        server.state().reload(config).unwrap();

        let after = server.state().fetcher();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.config().timeout_secs, 3);
        assert_eq!(server.state().config().upstream.timeout_secs, 3);
    }

    #[tokio::test]
    async fn reload_keeps_in_flight_fetches_counted() {
        let mut config = ProxyConfig::default();
        config.upstream.max_concurrent_fetches = 2;
        let server = HttpServer::new(config.clone()).unwrap();

        let held = server.state().fetcher().limiter().acquire().await;
        server.state().reload(config.clone()).unwrap();
        assert_eq!(server.state().fetcher().limiter().available(), 1);

        config.upstream.max_concurrent_fetches = 4;
        server.state().reload(config).unwrap();
        assert_eq!(server.state().fetcher().limiter().available(), 3);

        drop(held);
        assert_eq!(server.state().fetcher().limiter().available(), 4);
    }
}
