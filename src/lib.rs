//! probegate — capability-token access control for a probe/tunnel
//! measurement platform.
//!
//! Library crate: the binary in `main.rs` and the integration tests in
//! `tests/` both build on these modules.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod models;
pub mod store;

use std::time::Duration;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub store: store::Store,
    pub bus: dispatch::CommandBus,
    pub config: config::Config,
}

impl AppState {
    pub fn new(config: config::Config) -> AppState {
        let store = store::Store::new(store::StoreOptions {
            scope_policy: config.scope_policy(),
            name_max_len: config.name_max_len,
            max_candidates: config.max_candidates,
            confirm_ttl: Duration::from_secs(config.confirm_ttl_secs),
        });
        AppState {
            store,
            bus: dispatch::CommandBus::new(),
            config,
        }
    }
}
