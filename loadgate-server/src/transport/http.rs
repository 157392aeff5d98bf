//! HTTP transport
//!
//! [`admission_middleware`] gates any axum router: admitted requests pass
//! through, policy rejections get `401 Unauthorized` and rate rejections get
//! `429 Too Many Requests`.
//!
//! The standalone server also answers a few decision and ops routes of its
//! own, which are not gated. When an upstream is configured every path on the
//! public listener belongs to the upstream, so these routes are only served by
//! [`admin_router`] on the separate admin address. Without an upstream the
//! public listener is a decision service and serves them as well:
//!
//! ## POST /admit
//!
//! Ask for a verdict on behalf of another client.
//!
//! ```json
//! { "client": "203.0.113.7" }
//! ```
//!
//! ```json
//! { "verdict": "admit", "allowed": true, "state": "default" }
//! ```
//!
//! ## GET /health
//!
//! Returns "OK" with 200 status.
//!
//! ## GET /metrics
//!
//! Prometheus text format.
//!
//! Every other path is gated and then either forwarded to the configured
//! upstream or answered with `200 OK`.

use super::Transport;
use crate::gate::Gate;
use crate::metrics::Transport as MetricsTransport;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use loadgate::Verdict;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Largest request body forwarded upstream
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Request body of `POST /admit`
#[derive(Debug, Serialize, Deserialize)]
pub struct AdmitRequest {
    /// Identifier of the client to decide on
    pub client: String,
}

/// Response body of `POST /admit`
#[derive(Debug, Serialize, Deserialize)]
pub struct AdmitResponse {
    /// `admit`, `reject_policy` or `reject_rate`
    pub verdict: String,
    pub allowed: bool,
    /// Load state after this check, e.g. `default` or `tier0`
    pub state: String,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(HttpErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Axum middleware applying the gate to every request it wraps
///
/// Install with `axum::middleware::from_fn_with_state(gate, admission_middleware)`.
/// The router must be served with connect info
/// (`into_make_service_with_connect_info::<SocketAddr>()`).
pub async fn admission_middleware(
    State(gate): State<Gate>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let client = gate.identity().identify_request(request.headers(), peer);

    match gate.check(MetricsTransport::Http, &client) {
        Verdict::Admit => next.run(request).await,
        Verdict::RejectPolicy => error_response(StatusCode::UNAUTHORIZED, "Unauthorized"),
        Verdict::RejectRate => error_response(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests"),
    }
}

/// Forwards admitted requests to a fixed base URL
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base: String,
}

impl Upstream {
    /// Forward to `base`, connecting directly rather than through any
    /// proxy configured in the environment
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .context("failed to build upstream client")?;
        Ok(Upstream {
            client,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Replay `request` against the upstream and relay its response
    pub async fn forward(&self, request: Request) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base, path);

        let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .context("failed to read request body")?;
        let mut headers = parts.headers;
        headers.remove(header::HOST);

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .with_context(|| format!("upstream request to {url} failed"))?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        headers.remove(header::TRANSFER_ENCODING);
        headers.remove(header::CONNECTION);
        let bytes = upstream
            .bytes()
            .await
            .context("failed to read upstream response")?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

struct AppState {
    gate: Gate,
    upstream: Option<Upstream>,
}

/// Build the public router
///
/// With an upstream every path is gated and forwarded, so no client can spend
/// another client's budget through `/admit`. Without one the decision routes
/// are open and everything else goes through [`admission_middleware`].
pub fn router(gate: Gate, upstream: Option<Upstream>) -> Router {
    let proxying = upstream.is_some();
    let state = Arc::new(AppState {
        gate: gate.clone(),
        upstream,
    });

    let protected = Router::new()
        .fallback(handle_protected)
        .layer(middleware::from_fn_with_state(gate, admission_middleware))
        .with_state(Arc::clone(&state));

    if proxying {
        return protected;
    }

    decision_routes()
        .with_state(state)
        .fallback_service(protected)
}

/// Build the router served on the admin address: the decision and ops
/// routes only
pub fn admin_router(gate: Gate) -> Router {
    decision_routes().with_state(Arc::new(AppState {
        gate,
        upstream: None,
    }))
}

fn decision_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admit", post(handle_admit))
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(handle_metrics))
}

/// HTTP transport implementation
pub struct HttpTransport {
    addr: SocketAddr,
    admin: Option<SocketAddr>,
    upstream: Option<Upstream>,
}

impl HttpTransport {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("invalid HTTP address {host}:{port}"))?;
        Ok(Self {
            addr,
            admin: None,
            upstream: None,
        })
    }

    /// Also serve [`admin_router`] on `port` of the same host
    pub fn with_admin_port(mut self, port: Option<u16>) -> Self {
        self.admin = port.map(|port| SocketAddr::new(self.addr.ip(), port));
        self
    }

    pub fn with_upstream(mut self, base: Option<String>) -> Result<Self> {
        self.upstream = base.map(Upstream::new).transpose()?;
        Ok(self)
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener, gate: Gate) -> Result<()> {
        let app = router(gate, self.upstream);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    /// Serve the admin routes on an already bound listener
    pub async fn serve_admin(listener: TcpListener, gate: Gate) -> Result<()> {
        axum::serve(listener, admin_router(gate)).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(self, gate: Gate) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!(
            upstream = self.upstream.as_ref().map(|u| u.base.as_str()),
            "HTTP server listening on {}",
            self.addr
        );

        let Some(admin_addr) = self.admin else {
            return self.serve(listener, gate).await;
        };
        let admin_listener = TcpListener::bind(admin_addr).await?;
        tracing::info!("HTTP admin routes listening on {}", admin_addr);

        tokio::try_join!(
            self.serve(listener, gate.clone()),
            Self::serve_admin(admin_listener, gate)
        )?;
        Ok(())
    }
}

async fn handle_admit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdmitRequest>,
) -> Result<Json<AdmitResponse>, Response> {
    if req.client.is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "client must not be empty",
        ));
    }

    let verdict = state.gate.check(MetricsTransport::Http, &req.client);
    Ok(Json(AdmitResponse {
        verdict: verdict.as_str().to_string(),
        allowed: verdict.is_admitted(),
        state: state.gate.engine().load_state().to_string(),
    }))
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.gate.export_prometheus(),
    )
}

async fn handle_protected(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let Some(upstream) = &state.upstream else {
        return (StatusCode::OK, "OK").into_response();
    };

    match upstream.forward(request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Upstream error: {:#}", e);
            state.gate.metrics().record_upstream_error();
            error_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
        }
    }
}
