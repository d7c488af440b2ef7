/// HTTP ingress for the switchboard.
///
/// `POST /api/webhook` authenticates, normalizes, rate-limits and enqueues an
/// inbound chat event, answering 202 without waiting on any provider.
/// `GET /api/health` and `GET /metrics` serve liveness and Prometheus text.
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{CONTENT_LENGTH, HOST};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{AuthError, SwitchboardError};
use crate::payload::normalize_payload;
use crate::queue::{NewTask, QueueName, TaskQueue};
use crate::ratelimit::RateLimiter;
use crate::security::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER, TOKEN_HEADER};
use crate::security::{SignatureVerifier, mask_phone, preview, sanitize_text};
use crate::storage;
use crate::telemetry;
use crate::tenants::TenantRegistry;

pub const TENANT_HEADER: &str = "X-Tenant-Domain";
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";
const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Shared state behind every handler.
#[derive(Clone)]
pub struct GatewayState {
    verifier: Arc<SignatureVerifier>,
    tenants: Arc<TenantRegistry>,
    limiter: Arc<RateLimiter>,
    queue: Arc<TaskQueue>,
    default_country_code: Arc<str>,
    max_text_chars: usize,
    max_body_bytes: usize,
    metrics: Option<PrometheusHandle>,
}

impl GatewayState {
    pub fn new(
        config: &Config,
        tenants: Arc<TenantRegistry>,
        limiter: Arc<RateLimiter>,
        queue: Arc<TaskQueue>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            verifier: Arc::new(SignatureVerifier::new(
                &config.security.shared_secret,
                &config.security.webhook_token,
                config.security.timestamp_tolerance_secs,
            )),
            tenants,
            limiter,
            queue,
            default_country_code: Arc::from(config.ingest.default_country_code.as_str()),
            max_text_chars: config.ingest.max_text_chars,
            max_body_bytes: config.gateway.max_body_bytes,
            metrics,
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/webhook", post(webhook_handler))
        .route("/api/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// GET /api/health
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION
    }))
}

/// GET /metrics
async fn metrics_handler(State(state): State<GatewayState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn reject(tenant: &str, outcome: &str, status: StatusCode, message: &str) -> Response {
    telemetry::record_webhook(tenant, outcome);
    (status, Json(serde_json::json!({"error": message}))).into_response()
}

/// Reads the body up to the configured limit. `None` means it was larger.
async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Option<axum::body::Bytes> {
    let declared = header_str(headers, CONTENT_LENGTH.as_str()).and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return None;
    }
    axum::body::to_bytes(body, limit).await.ok()
}

/// POST /api/webhook
async fn webhook_handler(State(state): State<GatewayState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let headers = &parts.headers;

    let correlation_id = header_str(headers, CORRELATION_HEADER)
        .or_else(|| header_str(headers, REQUEST_ID_HEADER))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
    let address = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |info| info.0.ip().to_string());
    let domain_hint =
        header_str(headers, TENANT_HEADER).or_else(|| header_str(headers, HOST.as_str()));
    let tenant = state.tenants.resolve(domain_hint);
    // Metric label only; resolution is enforced after authentication.
    let label = tenant
        .as_ref()
        .map_or_else(|| "unknown".to_string(), |t| t.id.clone());

    let Some(raw) = read_body(headers, body, state.max_body_bytes).await else {
        warn!("webhook from {}: payload too large", address);
        return reject(&label, "too_large", StatusCode::PAYLOAD_TOO_LARGE, "payload too large");
    };

    if let Err(e) = state.verifier.verify(
        &raw,
        header_str(headers, TIMESTAMP_HEADER),
        header_str(headers, SIGNATURE_HEADER),
    ) {
        warn!(
            "webhook from {} rejected: {} (correlation {})",
            address, e, correlation_id
        );
        return if e.is_bad_request() {
            let outcome = if matches!(e, AuthError::StaleTimestamp { .. }) {
                "stale"
            } else {
                "bad_request"
            };
            reject(&label, outcome, StatusCode::BAD_REQUEST, &e.to_string())
        } else {
            reject(&label, "unauthorized", StatusCode::UNAUTHORIZED, "unauthorized")
        };
    }
    if let Err(e) = state.verifier.check_token(header_str(headers, TOKEN_HEADER)) {
        warn!("webhook from {} rejected: {}", address, e);
        return reject(&label, "unauthorized", StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let message = match normalize_payload(&raw, &state.default_country_code) {
        Ok(message) => message,
        Err(e) => {
            debug!("webhook {}: {}", correlation_id, e);
            return reject(&label, "bad_request", StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    let Some(tenant) = tenant else {
        warn!(
            "webhook {}: no tenant for domain {:?}",
            correlation_id, domain_hint
        );
        return reject(&label, "tenant_not_found", StatusCode::NOT_FOUND, "unknown tenant");
    };

    let admitted = {
        let limiter = state.limiter.clone();
        let tenant_id = tenant.id.clone();
        let quotas = tenant.quotas;
        let address = address.clone();
        let sender = message.sender.clone();
        storage::blocking(move || limiter.check(&tenant_id, quotas, &address, &sender)).await
    };
    match admitted {
        Ok(()) => {}
        Err(SwitchboardError::RateLimited(reason)) => {
            info!(
                "webhook {}: {} for {} from {}",
                correlation_id,
                reason,
                mask_phone(&message.sender),
                address
            );
            return reject(
                &tenant.id,
                reason.as_str(),
                StatusCode::TOO_MANY_REQUESTS,
                "rate limit exceeded",
            );
        }
        Err(e) => {
            error!("webhook {}: rate limiter unavailable: {}", correlation_id, e);
            return reject(
                &tenant.id,
                "unavailable",
                StatusCode::SERVICE_UNAVAILABLE,
                "temporarily unavailable",
            );
        }
    }

    let task = NewTask {
        tenant_id: tenant.id.clone(),
        recipient: message.sender,
        body: sanitize_text(&message.text, state.max_text_chars),
        kind: message.kind,
        correlation_id,
    };
    let enqueued = {
        let queue = state.queue.clone();
        let task = task.clone();
        storage::blocking(move || queue.enqueue(QueueName::Primary, &task)).await
    };
    match enqueued {
        Ok(id) => {
            info!(
                "webhook {}: queued task {} for {} ({}, \"{}\")",
                task.correlation_id,
                id,
                mask_phone(&task.recipient),
                task.kind.as_str(),
                preview(&task.body, 60)
            );
            telemetry::record_webhook(&tenant.id, "accepted");
            let mut response = (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({"queued": true})),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&task.correlation_id) {
                response.headers_mut().insert(CORRELATION_HEADER, value);
            }
            response
        }
        Err(e) => {
            error!("webhook {}: enqueue failed: {}", task.correlation_id, e);
            reject(
                &tenant.id,
                "unavailable",
                StatusCode::SERVICE_UNAVAILABLE,
                "temporarily unavailable",
            )
        }
    }
}

/// Bind and serve until `shutdown` flips to `true`.
pub async fn serve(
    state: GatewayState,
    host: &str,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("gateway listening on {}", addr);

    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("gateway server error")?;
    info!("gateway stopped");
    Ok(())
}
