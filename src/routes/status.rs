use crate::error::Result;
use crate::routes::{AppState, check_access};
use crate::utils::client_identity;
use axum::Json;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub ok: bool,
    pub protected: bool,
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uses_this_minute: usize,
    pub rate_limit: usize,
}

/// Liveness plus what the client needs to configure itself. Never gated.
pub async fn ping(State(state): State<AppState>) -> Json<PingResponse> {
    Json(PingResponse {
        ok: state.provider.has_credentials(),
        protected: state.gate.is_protected(),
    })
}

/// Check a password without spending rate budget.
pub async fn auth(State(state): State<AppState>, Json(body): Json<AuthRequest>) -> Json<AuthResponse> {
    let ok = state.gate.authorized(Some(body.key.as_str()));
    info!(event = "auth_checked", accepted = ok, "Access key checked");
    Json(AuthResponse { ok })
}

pub async fn stats(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>> {
    check_access(&state, &headers)?;
    let client = client_identity(&headers, peer.map(|ConnectInfo(addr)| addr));
    Ok(Json(StatsResponse {
        uses_this_minute: state.limiter.usage(&client).await,
        rate_limit: state.limiter.limit(),
    }))
}
