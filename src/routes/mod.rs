//! HTTP surface: router, shared state and the admission checks every
//! analysis endpoint runs before touching the request body.

pub mod analyze;
pub mod batch;
pub mod status;

use crate::error::{FormaError, Result, ValidationError};
use crate::llm::LlmProvider;
use crate::services::{BatchCoordinator, ModeRegistry, StreamRelay};
use crate::settings::Settings;
use crate::store::AnalysisStore;
use crate::utils::access_gate::ACCESS_HEADER;
use crate::utils::{AccessGate, RateLimiter, client_identity, create_request_rate_limiter};
use axum::extract::DefaultBodyLimit;
use axum::extract::multipart::MultipartError;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Per-request upstream credential override.
pub const UPSTREAM_KEY_HEADER: &str = "x-openai-key";

/// One image plus form fields, with multipart overhead.
pub const ANALYZE_BODY_LIMIT: usize = 24 * 1024 * 1024;
pub const BATCH_BODY_LIMIT: usize = 200 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub modes: Arc<ModeRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub gate: Arc<AccessGate>,
    pub provider: Arc<dyn LlmProvider>,
    pub relay: StreamRelay,
    pub batch: Arc<BatchCoordinator>,
}

impl AppState {
    pub fn new(settings: Settings, provider: Arc<dyn LlmProvider>, store: Arc<dyn AnalysisStore>) -> Self {
        let modes = Arc::new(ModeRegistry::new());
        let relay = StreamRelay::new(Arc::clone(&provider), &settings.model, settings.upstream_timeout);
        let batch = Arc::new(BatchCoordinator::new(
            Arc::clone(&provider),
            Arc::clone(&modes),
            store,
            &settings.model,
            settings.upstream_timeout,
        ));

        Self {
            gate: Arc::new(AccessGate::new(settings.access_secret.clone())),
            limiter: Arc::new(create_request_rate_limiter()),
            settings: Arc::new(settings),
            modes,
            provider,
            relay,
            batch,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/analyze",
            post(analyze::analyze).layer(DefaultBodyLimit::max(ANALYZE_BODY_LIMIT)),
        )
        .route("/batch", post(batch::batch).layer(DefaultBodyLimit::max(BATCH_BODY_LIMIT)))
        .route("/ping", get(status::ping))
        .route("/auth", post(status::auth))
        .route("/stats", get(status::stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reject callers without the access secret.
pub(crate) fn check_access(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let presented = headers.get(ACCESS_HEADER).and_then(|v| v.to_str().ok());
    if state.gate.authorized(presented) {
        return Ok(());
    }
    warn!(
        event = "access_denied",
        presented = presented.is_some(),
        "Request without a valid access key"
    );
    Err(FormaError::Unauthorized)
}

/// Access check, then a rate-limit slot for the caller. Returns the caller's identity.
pub(crate) async fn admit(state: &AppState, headers: &HeaderMap, peer: Option<SocketAddr>) -> Result<String> {
    check_access(state, headers)?;
    let client = client_identity(headers, peer);
    if !state.limiter.admit(&client).await {
        return Err(FormaError::RateLimit);
    }
    Ok(client)
}

pub(crate) fn upstream_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(UPSTREAM_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn form_error(e: MultipartError) -> FormaError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ValidationError::TooLarge.into()
    } else {
        ValidationError::MalformedForm(e.body_text()).into()
    }
}
