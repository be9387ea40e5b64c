use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use wabridge_core::metrics::{MetricsSnapshot, MetricsStore};
use wabridge_pipeline::dispatcher::WebhookDispatcher;
use wabridge_whatsapp::webhook::{parse_webhook_events, verify_signature, verify_subscription};

/// HTTP surface for the WhatsApp gateway: a health/metrics pair for
/// operators, and the Cloud API webhook (subscription-verification GET,
/// event-delivery POST). Session browsing, websocket event streaming, and
/// other inbound channel routes are out of scope and not exposed here.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<WebhookDispatcher>,
    metrics: Arc<MetricsStore>,
    auth_token: Option<String>,
    whatsapp_verify_token: String,
    whatsapp_app_secret: String,
}

pub struct Gateway {
    state: AppState,
    port: u16,
}

impl Gateway {
    pub fn new(
        dispatcher: Arc<WebhookDispatcher>,
        port: u16,
        metrics: Arc<MetricsStore>,
        auth_token: Option<String>,
        whatsapp_verify_token: String,
        whatsapp_app_secret: String,
    ) -> Self {
        Self {
            state: AppState {
                dispatcher,
                metrics,
                auth_token,
                whatsapp_verify_token,
                whatsapp_app_secret,
            },
            port,
        }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/api/status", get(api_status))
            .route("/api/metrics", get(get_metrics))
            .route(
                "/webhook/whatsapp",
                get(whatsapp_verify).post(whatsapp_webhook),
            )
            .with_state(self.state.clone())
    }

    /// Binds `0.0.0.0` unconditionally: the WhatsApp webhook must be
    /// internet-reachable regardless of whether `/api/*` carries a bearer
    /// token, and the webhook route is independently protected by
    /// `verify_token`/`app_secret` rather than the operator auth token.
    pub async fn start(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "gateway listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    token_matches(state.auth_token.as_deref(), headers)
}

fn token_matches(expected: Option<&str>, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

#[derive(serde::Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
}

async fn api_status(State(_state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse { status: "running", version: env!("CARGO_PKG_VERSION") })
}

async fn get_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MetricsSnapshot>, StatusCode> {
    check_auth(&state, &headers)?;
    Ok(Json(state.metrics.snapshot()))
}

#[derive(Deserialize)]
struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// GET /webhook/whatsapp — the Cloud API subscription handshake.
async fn whatsapp_verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<String, StatusCode> {
    match verify_subscription(
        query.mode.as_deref(),
        query.verify_token.as_deref(),
        query.challenge.as_deref(),
        &state.whatsapp_verify_token,
    ) {
        Some(challenge) => Ok(challenge),
        None => Err(StatusCode::FORBIDDEN),
    }
}

/// POST /webhook/whatsapp — the Cloud API event-delivery callback.
/// Signature verification happens over the raw bytes before any parsing.
async fn whatsapp_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<Value>, StatusCode> {
    if let Some(signature) = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok())
    {
        if !verify_signature(&state.whatsapp_app_secret, &body, signature) {
            warn!("rejected webhook delivery with invalid signature");
            wabridge_core::audit::log_audit_internal(
                "webhook_signature_invalid",
                "whatsapp",
                json!({ "signature": signature }),
            );
            return Err(StatusCode::UNAUTHORIZED);
        }
    } else {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let events = parse_webhook_events(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let mut accepted = 0usize;
    for event in events {
        if state.dispatcher.dispatch(event).await.is_some() {
            accepted += 1;
        }
    }

    Ok(Json(json!({ "status": "ok", "accepted": accepted })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_passes_without_a_configured_token() {
        let headers = HeaderMap::new();
        assert!(token_matches(None, &headers).is_ok());
    }

    #[test]
    fn auth_rejects_missing_bearer_when_token_configured() {
        let headers = HeaderMap::new();
        assert_eq!(token_matches(Some("secret"), &headers), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn auth_accepts_matching_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        assert!(token_matches(Some("secret"), &headers).is_ok());
    }

    #[test]
    fn verify_subscription_requires_matching_token_and_mode() {
        assert_eq!(
            verify_subscription(Some("subscribe"), Some("tok"), Some("echo"), "tok"),
            Some("echo".to_string())
        );
        assert_eq!(verify_subscription(Some("subscribe"), Some("wrong"), Some("echo"), "tok"), None);
    }
}
