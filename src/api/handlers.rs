use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::peer::PeerAllowEntry;
use crate::models::probe::Probe;
use crate::models::sim::SimAllowance;
use crate::models::token::{AccessLogEntry, TokenRecord, TunnelToken};
use crate::store::sims::SimRequest;
use crate::store::ActivationFields;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterProbeRequest {
    pub mac: String,
}

#[derive(Serialize)]
pub struct RegisterProbeResponse {
    pub id: Uuid,
    pub mac: Option<String>,
}

#[derive(Deserialize)]
pub struct ChangeNameRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct ChangeCountryRequest {
    pub country: String,
}

#[derive(Deserialize)]
pub struct CreateTokenRequest {
    pub scope: u32,
    pub mac: Option<String>,
}

#[derive(Serialize)]
pub struct CreateTokenResponse {
    pub token: String,
    pub scope: u32,
    pub message: String,
}

#[derive(Deserialize)]
pub struct ActivateTokenRequest {
    pub token_candidate: String,
    pub scope: u32,
    pub ip: Option<String>,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct TokenValueRequest {
    pub token: String,
}

#[derive(Serialize)]
pub struct ChallengeResponse {
    pub confirm: String,
    pub expires_in_secs: u64,
}

#[derive(Deserialize)]
pub struct DeactivateTokenRequest {
    pub token: String,
    pub confirm: String,
}

#[derive(Deserialize)]
pub struct CreateTunnelTokenRequest {
    pub admin: bool,
    pub scope: u32,
}

#[derive(Serialize)]
pub struct TunnelTokenResponse {
    pub id: i64,
    pub token: String,
}

#[derive(Deserialize)]
pub struct AllowSimRequest {
    pub imsi: Option<String>,
    pub iccid: Option<String>,
    pub public: bool,
    pub provide: bool,
    pub request: bool,
}

#[derive(Deserialize)]
pub struct AllowPeerRequest {
    pub mac: Option<String>,
    pub token: Option<String>,
    pub ip: String,
    #[serde(default)]
    pub replace: bool,
}

#[derive(Deserialize)]
pub struct DisallowPeerRequest {
    pub mac: Option<String>,
    pub token: Option<String>,
}

// ── Probe handlers ───────────────────────────────────────────

/// GET /api/v1/probes — list all probes
pub async fn list_probes(State(state): State<Arc<AppState>>) -> Json<Vec<Probe>> {
    Json(state.store.probes.list())
}

/// POST /api/v1/probes/register — register a probe by hardware address
pub async fn register_probe(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterProbeRequest>,
) -> Result<(StatusCode, Json<RegisterProbeResponse>), AppError> {
    let probe = state.store.register_probe(&payload.mac)?;
    tracing::info!(probe = %probe.id, "probe registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisterProbeResponse {
            id: probe.id,
            mac: probe.mac,
        }),
    ))
}

/// POST /api/v1/probes/:id/activate
pub async fn activate_probe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.probes.activate(id)?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/v1/probes/:id/deactivate
pub async fn deactivate_probe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.probes.deactivate(id)?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/v1/probes/:id/name — metadata change, any status
pub async fn change_probe_name(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ChangeNameRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.probes.change_name(id, &payload.name)?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/v1/probes/:id/country — metadata change, any status
pub async fn change_probe_country(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ChangeCountryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.probes.change_country(id, &payload.country)?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/v1/probes/:id/execute/:command — liveness gate, then
/// dispatch to the probe's long-poll channel.
pub async fn execute_probe(
    State(state): State<Arc<AppState>>,
    Path((id, command)): Path<(Uuid, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    if command.trim().is_empty() {
        return Err(AppError::InvalidValue("command must not be empty".into()));
    }
    let probe = state.store.ensure_probe_active(id)?;
    let receivers = state.bus.publish(probe.id, command.trim());
    tracing::info!(probe = %probe.id, command = %command, receivers, "command dispatched");
    Ok(Json(json!({ "dispatched": receivers > 0 })))
}

// ── Token handlers ───────────────────────────────────────────

/// GET /api/v1/tokens — list tokens and candidates
pub async fn list_tokens(State(state): State<Arc<AppState>>) -> Json<Vec<TokenRecord>> {
    Json(state.store.tokens.list())
}

/// POST /api/v1/tokens — create a token candidate
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateTokenRequest>,
) -> Result<(StatusCode, Json<CreateTokenResponse>), AppError> {
    let record = state
        .store
        .create_candidate(payload.scope, payload.mac.as_deref())?;
    Ok((
        StatusCode::CREATED,
        Json(CreateTokenResponse {
            token: record.value,
            scope: record.scope.bits(),
            message: "token candidate created; activate it to authorize use".to_string(),
        }),
    ))
}

/// POST /api/v1/tokens/activate — promote a candidate and bind resources
pub async fn activate_token(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ActivateTokenRequest>,
) -> Result<Json<TokenRecord>, AppError> {
    let fields = ActivationFields {
        ip: payload.ip,
        name: payload.name,
    };
    let record = state
        .store
        .activate_token(&payload.token_candidate, payload.scope, &fields)?;
    Ok(Json(record))
}

/// POST /api/v1/tokens/challenge — issue the revocation confirmation
/// phrase for a token
pub async fn revocation_challenge(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TokenValueRequest>,
) -> Result<Json<ChallengeResponse>, AppError> {
    let confirm = state.store.revocation_challenge(&payload.token)?;
    Ok(Json(ChallengeResponse {
        confirm,
        expires_in_secs: state.config.confirm_ttl_secs,
    }))
}

/// POST /api/v1/tokens/deactivate — revoke a token, cascading to its
/// bound resources
pub async fn deactivate_token(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DeactivateTokenRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.revoke_token(&payload.token, &payload.confirm)?;
    Ok(Json(json!({ "ok": true })))
}

/// GET /api/v1/tokens/log — bounded token access log
pub async fn token_log(State(state): State<Arc<AppState>>) -> Json<Vec<AccessLogEntry>> {
    Json(state.store.tokens.access_log())
}

// ── Tunnel token / SIM handlers ──────────────────────────────

/// GET /api/v1/tunnel/tokens
pub async fn list_tunnel_tokens(State(state): State<Arc<AppState>>) -> Json<Vec<TunnelToken>> {
    Json(state.store.tunnel_tokens.list())
}

/// POST /api/v1/tunnel/tokens — create a tunnel token (active on
/// creation; admin tokens bypass per-probe scoping)
pub async fn create_tunnel_token(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateTunnelTokenRequest>,
) -> Result<(StatusCode, Json<TunnelTokenResponse>), AppError> {
    let token = state
        .store
        .create_tunnel_token(payload.scope, payload.admin)?;
    Ok((
        StatusCode::CREATED,
        Json(TunnelTokenResponse {
            id: token.id,
            token: token.value,
        }),
    ))
}

/// POST /api/v1/tunnel/tokens/:id/revoke — revoke and drop its SIM grants
pub async fn revoke_tunnel_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.revoke_tunnel_token(id)?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/v1/tunnel/tokens/:id/sim — grant SIM access under a token
pub async fn allow_sim(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<AllowSimRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req = SimRequest {
        imsi: payload.imsi,
        iccid: payload.iccid,
        public: payload.public,
        provide: payload.provide,
        request: payload.request,
    };
    state.store.allow_sim(id, &req)?;
    Ok(Json(json!({ "ok": true })))
}

/// GET /api/v1/tunnel/sims
pub async fn list_sims(State(state): State<Arc<AppState>>) -> Json<Vec<SimAllowance>> {
    Json(state.store.sims.list())
}

// ── WireGuard peer handlers ──────────────────────────────────

/// GET /api/v1/wireguard/peers
pub async fn list_peers(State(state): State<Arc<AppState>>) -> Json<Vec<PeerAllowEntry>> {
    Json(state.store.peers.list())
}

/// POST /api/v1/wireguard/allow — admit a peer by mac or owning token
pub async fn allow_peer(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AllowPeerRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let ip: IpAddr = payload
        .ip
        .parse()
        .map_err(|_| AppError::InvalidValue(format!("not an ip address: {}", payload.ip)))?;

    match (payload.mac.as_deref(), payload.token.as_deref()) {
        (Some(mac), None) => state.store.allow_peer(mac, ip, payload.replace)?,
        (None, Some(token)) => state.store.allow_peer_via_token(token, ip, payload.replace)?,
        _ => {
            return Err(AppError::InvalidValue(
                "exactly one of mac or token is required".to_string(),
            ))
        }
    }
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/v1/wireguard/disallow — idempotent peer removal
pub async fn disallow_peer(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DisallowPeerRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = match (payload.mac.as_deref(), payload.token.as_deref()) {
        (Some(mac), None) => state.store.disallow_peer(mac)?,
        (None, Some(token)) => state.store.disallow_peer_token(token),
        _ => {
            return Err(AppError::InvalidValue(
                "exactly one of mac or token is required".to_string(),
            ))
        }
    };
    Ok(Json(json!({ "removed": removed })))
}
