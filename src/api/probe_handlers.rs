//! Device-facing endpoints: everything here is authorized by a bearer
//! token, not the admin key.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::peer::PeerConfig;
use crate::models::probe::{Probe, ProbeStatus};
use crate::models::scope::Scope;
use crate::models::token::TokenRecord;
use crate::store::tokens::validate_value;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterCandidateRequest {
    pub token_candidate: String,
    pub scope: u32,
    pub mac: String,
}

#[derive(Deserialize)]
pub struct WireguardRegisterRequest {
    pub publickey: String,
    pub mac: String,
}

#[derive(Deserialize)]
pub struct StartupRequest {
    pub mac: String,
}

#[derive(Serialize)]
pub struct PollResponse {
    pub command: Option<String>,
}

// ── Bearer auth ──────────────────────────────────────────────

fn bearer_token(
    state: &AppState,
    headers: &HeaderMap,
    required: Scope,
) -> Result<TokenRecord, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(AppError::Unauthorized)?;

    validate_value(value).map_err(|_| AppError::Forbidden)?;
    state.store.check_bearer(value, required)
}

fn probe_for_token(state: &AppState, token: &TokenRecord) -> Result<Probe, AppError> {
    if let Some(id) = token.bound.as_ref().and_then(|b| b.probe_id()) {
        return state.store.probes.get(id).ok_or(AppError::Forbidden);
    }
    token
        .mac
        .as_deref()
        .and_then(|mac| state.store.probes.get_by_mac(mac))
        .ok_or(AppError::Forbidden)
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /register — a device submits its own token candidate together
/// with its hardware address; an admin activates it later.
pub async fn register_candidate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterCandidateRequest>,
) -> Result<StatusCode, AppError> {
    state
        .store
        .register_candidate(&payload.token_candidate, payload.scope, &payload.mac)?;
    Ok(StatusCode::CREATED)
}

/// GET /tokens/active — 200 iff the bearer token is active.
pub async fn token_active(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    bearer_token(&state, &headers, Scope::from_bits(0))?;
    Ok(StatusCode::OK)
}

/// POST /wireguard/register — one-shot peer registration: store the
/// probe's public key, consume the registration flag, return the tunnel
/// client configuration.
pub async fn wireguard_register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<WireguardRegisterRequest>,
) -> Result<Json<PeerConfig>, AppError> {
    let token = bearer_token(&state, &headers, Scope::WIREGUARD)?;
    let ip = state
        .store
        .register_peer(&token, &payload.publickey, &payload.mac)?;

    let wg = &state.config.wireguard;
    Ok(Json(PeerConfig {
        ip: ip.to_string(),
        endpoint: wg.endpoint.clone(),
        endpoint_publickey: wg.endpoint_publickey.clone(),
        allowed_ips: wg.allowed_ips.clone(),
        dns: wg.dns.clone(),
    }))
}

/// POST /probe/startup — service-startup report from a probe.
pub async fn startup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<StartupRequest>,
) -> Result<StatusCode, AppError> {
    let token = bearer_token(&state, &headers, Scope::PROBE)?;

    let mac = payload.mac.to_ascii_lowercase();
    if token.mac.as_deref() != Some(mac.as_str()) {
        return Err(AppError::InvalidValue(
            "mac does not match the registered token".to_string(),
        ));
    }

    let probe = probe_for_token(&state, &token)?;
    state.store.probes.log_startup(probe.id, &mac);
    Ok(StatusCode::OK)
}

/// POST /probe/poll — long poll for the next dispatched command.
pub async fn poll(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PollResponse>, AppError> {
    let token = bearer_token(&state, &headers, Scope::PROBE)?;
    let probe = probe_for_token(&state, &token)?;
    if probe.status == ProbeStatus::Deactivated {
        return Err(AppError::ProbeNotActive);
    }

    state.store.probes.touch_poll(probe.id);

    let mut rx = state.bus.subscribe(probe.id);
    let window = Duration::from_secs(state.config.poll_interval_secs);
    let command = match tokio::time::timeout(window, rx.recv()).await {
        Ok(Ok(command)) => Some(command),
        _ => None,
    };

    Ok(Json(PollResponse { command }))
}
