//! HTTP(S) front end: every POST body becomes one MLLP message, and the
//! acknowledgement becomes the `201 Created` response body.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use log::{error, info, warn};
use std::io;
use std::path::Path;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::HttpConfig;
use crate::error::GatewayError;
use crate::pool::ConnectionPool;

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Response headers added to every acknowledgement.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    pub content_type: Option<HeaderValue>,
    /// Seconds for `Keep-Alive: timeout=<n>`.
    pub keep_alive: Option<u64>,
}

impl ResponseHeaders {
    pub fn from_config(config: &HttpConfig) -> Self {
        let content_type = config.content_type.as_deref().and_then(|value| {
            HeaderValue::from_str(value)
                .map_err(|_| warn!("Ignoring invalid Content-Type {:?}", value))
                .ok()
        });
        Self {
            content_type,
            keep_alive: config.keep_alive,
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: ConnectionPool,
    pub headers: ResponseHeaders,
}

/// Builds the gateway router. Any path accepts a POST.
#[allow(deprecated)]
pub fn router(state: AppState, request_timeout: Option<Duration>) -> Router {
    let mut router = Router::new()
        .route("/", post(forward))
        .route("/{*path}", post(forward))
        .with_state(state);
    if let Some(limit) = request_timeout {
        router = router.layer(TimeoutLayer::new(limit));
    }
    router.layer(TraceLayer::new_for_http())
}

async fn forward(State(state): State<AppState>, body: Bytes) -> Result<Response, GatewayError> {
    info!("Message: {} bytes", body.len());
    let ack = state.pool.send(body).await?;
    info!("Response: {} bytes", ack.len());

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::CREATED;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(ack.len()));
    if let Some(content_type) = &state.headers.content_type {
        headers.insert(header::CONTENT_TYPE, content_type.clone());
    }
    if let Some(seconds) = state.headers.keep_alive {
        if let Ok(value) = HeaderValue::from_str(&format!("timeout={}", seconds)) {
            headers.insert(header::HeaderName::from_static("keep-alive"), value);
        }
    }
    *response.body_mut() = Body::from(ack);
    Ok(response)
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::ConnectTimeout { .. } | GatewayError::SendTimeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            GatewayError::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Connect { .. } | GatewayError::Send(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        error!("Forwarding to MLLP failed: {}", self);
        (self.status_code(), self.to_string()).into_response()
    }
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> io::Result<RustlsConfig> {
    for (what, path) in [("Certificate", cert_path), ("Private key", key_path)] {
        if !path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} file not found: {:?}", what, path),
            ));
        }
    }
    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// Serves the gateway until Ctrl-C, then drains in-flight requests.
pub async fn serve(config: &HttpConfig, pool: ConnectionPool) -> io::Result<()> {
    let addr = config
        .socket_addr()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    let state = AppState {
        pool,
        headers: ResponseHeaders::from_config(config),
    };
    let app = router(state, config.request_timeout());

    let handle = Handle::new();
    tokio::spawn(shutdown_on_ctrl_c(handle.clone()));

    match &config.tls {
        Some(tls) => {
            let rustls = load_tls_config(&tls.cert_path, &tls.key_path).await?;
            info!("Listening on https://{}", addr);
            axum_server::bind_rustls(addr, rustls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        None => {
            info!("Listening on http://{}", addr);
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    }
}

async fn shutdown_on_ctrl_c(handle: Handle) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown requested, draining connections");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}
