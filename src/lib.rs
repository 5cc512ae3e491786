//! ldapgate verifies credentials against an LDAP directory.
//!
//! The [`ldap`] module holds the authentication core. [`app`] exposes it as a
//! Matrix identity REST callback; the `ldapgate-cli` crate wraps it for
//! OpenVPN.

#![forbid(unsafe_code)]
pub mod config;
pub mod error;
pub mod ldap;
mod router;
mod status;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};

pub use error::ServerError;
use ldap::{Authenticator, Connector, LdapConnector};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: axum::http::Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
pub struct AppState<C = LdapConnector> {
    pub authenticator: Arc<Authenticator<C>>,
    pub metrics: Option<PrometheusHandle>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            authenticator: Arc::clone(&self.authenticator),
            metrics: self.metrics.clone(),
        }
    }
}

impl AppState {
    /// Build the state of a server talking to a real directory.
    pub fn new(config: &config::Configuration, metrics: Option<PrometheusHandle>) -> Self {
        let authenticator = Authenticator::new(Arc::new(config.ldap.clone()));
        Self {
            authenticator: Arc::new(authenticator),
            metrics,
        }
    }
}

/// Create router.
pub fn app<C>(state: AppState<C>) -> Router
where
    C: Connector + 'static,
{
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(10),
        ))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
        ]));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(status::status))
        // `GET /metrics` goes to the Prometheus exporter.
        .route("/metrics", get(render_metrics::<C>))
        .route(
            "/_matrix-internal/identity/v1/check_credentials",
            post(router::matrix::check_credentials::<C>),
        )
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

async fn render_metrics<C>(State(state): State<AppState<C>>) -> impl IntoResponse
where
    C: Connector + 'static,
{
    match state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}
