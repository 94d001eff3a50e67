use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::AppState;

pub mod handlers;
pub mod probe_handlers;

/// Build the admin API router. All routes are relative — the caller
/// mounts this under `/api/v1`. Every route requires the admin key.
pub fn admin_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/probes", get(handlers::list_probes))
        .route("/probes/register", post(handlers::register_probe))
        .route("/probes/:id/activate", post(handlers::activate_probe))
        .route("/probes/:id/deactivate", post(handlers::deactivate_probe))
        .route("/probes/:id/name", post(handlers::change_probe_name))
        .route("/probes/:id/country", post(handlers::change_probe_country))
        .route(
            "/probes/:id/execute/:command",
            post(handlers::execute_probe),
        )
        .route(
            "/tokens",
            get(handlers::list_tokens).post(handlers::create_token),
        )
        .route("/tokens/activate", post(handlers::activate_token))
        .route("/tokens/challenge", post(handlers::revocation_challenge))
        .route("/tokens/deactivate", post(handlers::deactivate_token))
        .route("/tokens/log", get(handlers::token_log))
        .route(
            "/tunnel/tokens",
            get(handlers::list_tunnel_tokens).post(handlers::create_tunnel_token),
        )
        .route(
            "/tunnel/tokens/:id/revoke",
            post(handlers::revoke_tunnel_token),
        )
        .route("/tunnel/tokens/:id/sim", post(handlers::allow_sim))
        .route("/tunnel/sims", get(handlers::list_sims))
        .route("/wireguard/peers", get(handlers::list_peers))
        .route("/wireguard/allow", post(handlers::allow_peer))
        .route("/wireguard/disallow", post(handlers::disallow_peer))
        .layer(middleware::from_fn_with_state(state, admin_auth))
}

/// Device-facing routes, gated by bearer tokens instead of the admin key.
pub fn device_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(probe_handlers::register_candidate))
        .route("/tokens/active", get(probe_handlers::token_active))
        .route(
            "/wireguard/register",
            post(probe_handlers::wireguard_register),
        )
        .route("/probe/startup", post(probe_handlers::startup))
        .route("/probe/poll", post(probe_handlers::poll))
}

/// The full application router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .nest("/api/v1", admin_router(state.clone()))
        .merge(device_router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Middleware: validates `X-Admin-Key` header (or a bearer token carrying
/// the same value) against the configured admin key.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    match provided {
        Some(k)
            if bool::from(
                k.as_bytes()
                    .ct_eq(state.config.admin_key.as_bytes()),
            ) =>
        {
            Ok(next.run(req).await)
        }
        Some(_) => {
            tracing::warn!("admin API: invalid key");
            Err(AppError::Unauthorized)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(AppError::Unauthorized)
        }
    }
}
