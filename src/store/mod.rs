//! In-memory state: token tables, probe registry, peer allow-list, and
//! SIM allowances, behind one facade that owns the transition rules.
//!
//! Activation, revocation, and resource binding for a given token value
//! are serialized through a per-value lock; cross-table commits run under
//! a single short-lived binding lock so every fallible check happens
//! before the first mutation (all-or-nothing, per key).

pub mod peers;
pub mod probes;
pub mod sims;
pub mod tokens;

use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::peer::PeerKey;
use crate::models::probe::{normalize_mac, Probe};
use crate::models::scope::{Scope, ScopePolicy, TunnelScope};
use crate::models::token::{BoundResource, TokenRecord, TokenStatus, TunnelToken};

use peers::PeerTable;
use probes::ProbeRegistry;
use sims::{SimRequest, SimTable};
use tokens::{TokenTable, TunnelTable};

/// Tunables for the store, fed from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub scope_policy: ScopePolicy,
    pub name_max_len: usize,
    pub max_candidates: usize,
    pub confirm_ttl: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            scope_policy: ScopePolicy::default(),
            name_max_len: 64,
            max_candidates: 10,
            confirm_ttl: Duration::from_secs(600),
        }
    }
}

/// Fields supplied with a token activation request. Which of them are
/// mandatory or forbidden is decided by the scope codec.
#[derive(Debug, Clone, Default)]
pub struct ActivationFields {
    pub ip: Option<String>,
    pub name: Option<String>,
}

pub struct Store {
    pub tokens: TokenTable,
    pub tunnel_tokens: TunnelTable,
    pub probes: ProbeRegistry,
    pub peers: PeerTable,
    pub sims: SimTable,
    policy: ScopePolicy,
    /// Per-token-value serialization of activate/revoke/bind.
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Guards cross-table commit sections.
    commit: Mutex<()>,
}

impl Store {
    pub fn new(options: StoreOptions) -> Store {
        Store {
            tokens: TokenTable::new(options.confirm_ttl, options.max_candidates),
            tunnel_tokens: TunnelTable::new(),
            probes: ProbeRegistry::new(options.name_max_len),
            peers: PeerTable::new(),
            sims: SimTable::new(),
            policy: options.scope_policy,
            locks: DashMap::new(),
            commit: Mutex::new(()),
        }
    }

    fn token_lock(&self, value: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(value.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn lock_guard(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
        match lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ── Token lifecycle ──────────────────────────────────────────

    /// Create a server-generated token candidate.
    pub fn create_candidate(
        &self,
        scope_bits: u32,
        mac: Option<&str>,
    ) -> Result<TokenRecord, AppError> {
        let scope = self.policy.validate(Scope::from_bits(scope_bits))?;
        let mac = mac.map(normalize_mac).transpose()?;
        self.tokens.create_candidate(scope, mac)
    }

    /// Device self-registration of a candidate it drew itself. Stale
    /// unactivated candidates are pruned afterwards.
    pub fn register_candidate(
        &self,
        value: &str,
        scope_bits: u32,
        mac: &str,
    ) -> Result<TokenRecord, AppError> {
        let scope = self.policy.validate(Scope::from_bits(scope_bits))?;
        let mac = normalize_mac(mac)?;
        let record = self.tokens.register_candidate(value, scope, Some(mac))?;
        let pruned = self.tokens.prune_candidates();
        if pruned > 0 {
            tracing::debug!(pruned, "dropped stale token candidates");
        }
        Ok(record)
    }

    /// The central operation: validate a candidate against its declared
    /// scope and supplied fields, then atomically promote it to Active
    /// and bind its resources.
    pub fn activate_token(
        &self,
        value: &str,
        declared_bits: u32,
        fields: &ActivationFields,
    ) -> Result<TokenRecord, AppError> {
        let scope = self.policy.validate(Scope::from_bits(declared_bits))?;

        let lock = self.token_lock(value);
        let _guard = Self::lock_guard(&lock);

        let record = self.tokens.lookup(value).ok_or(AppError::NotFound)?;
        match record.status {
            TokenStatus::Candidate => {}
            TokenStatus::Active => return Err(AppError::AlreadyActive),
            TokenStatus::Revoked => return Err(AppError::AlreadyRevoked),
        }

        // The declared scope must agree with what the candidate was
        // registered for; reserved bits do not participate.
        if record.scope.known() != scope.known() {
            return Err(AppError::InvalidScope(declared_bits));
        }

        for &field in scope.required_fields() {
            let present = match field {
                "ip" => fields.ip.is_some(),
                "name" => fields.name.is_some(),
                _ => false,
            };
            if !present {
                return Err(AppError::MissingField(field));
            }
        }
        if fields.ip.is_some() && !scope.is_field_allowed("ip") {
            return Err(AppError::UnexpectedField("ip"));
        }
        if fields.name.is_some() && !scope.is_field_allowed("name") {
            return Err(AppError::UnexpectedField("name"));
        }

        let ip = fields
            .ip
            .as_deref()
            .map(|raw| {
                raw.parse::<IpAddr>()
                    .map_err(|_| AppError::InvalidValue(format!("not an ip address: {raw}")))
            })
            .transpose()?;

        // Commit section: every remaining check runs before the first
        // mutation, so a failure leaves the token Candidate and the
        // sibling tables untouched.
        let _commit = Self::lock_guard(&self.commit);

        let peer_key = PeerKey::Token(value.to_string());
        if let Some(ip) = ip {
            self.peers.check_allow(&peer_key, ip, false)?;
        }
        if let Some(name) = fields.name.as_deref() {
            self.probes.check_bind(name, record.mac.as_deref())?;
        }

        if let Some(ip) = ip {
            self.peers.allow(peer_key, ip, false, true)?;
        }
        let probe_id = match fields.name.as_deref() {
            Some(name) => Some(self.probes.bind_token(name, record.mac.as_deref(), value)?),
            None => None,
        };

        let bound = match (ip, probe_id) {
            (Some(ip), Some(id)) => BoundResource::PeerAndProbe { ip, id },
            (Some(ip), None) => BoundResource::Peer { ip },
            (None, Some(id)) => BoundResource::Probe { id },
            // unreachable: the policy rejects scopes with no known bits
            (None, None) => return Err(AppError::InvalidScope(declared_bits)),
        };

        self.tokens.commit_activation(value, scope, bound);
        tracing::info!(scope = scope.bits(), "token activated");
        self.tokens.lookup(value).ok_or(AppError::Unavailable)
    }

    /// Issue the confirmation phrase required to revoke a token.
    pub fn revocation_challenge(&self, value: &str) -> Result<String, AppError> {
        self.tokens.issue_challenge(value)
    }

    /// Revoke a token and detach everything it authorized, in one logical
    /// operation. Idempotent on an already-revoked token.
    pub fn revoke_token(&self, value: &str, confirmation: &str) -> Result<(), AppError> {
        let lock = self.token_lock(value);
        let _guard = Self::lock_guard(&lock);

        let record = self.tokens.lookup(value).ok_or(AppError::NotFound)?;
        if record.status == TokenStatus::Revoked {
            return Ok(());
        }

        self.tokens.verify_challenge(value, confirmation)?;

        let _commit = Self::lock_guard(&self.commit);

        // Detach resources before flipping status: no observable state
        // has the token Revoked while its peer entry is still allowed.
        self.peers.disallow(&PeerKey::Token(value.to_string()));
        if let Some(id) = record.bound.as_ref().and_then(|b| b.probe_id()) {
            if self.probes.deactivate(id).is_err() {
                tracing::warn!(probe = %id, "bound probe vanished before revocation");
            }
        }

        self.tokens.commit_revocation(value);
        tracing::info!("token revoked");
        Ok(())
    }

    /// Bearer-token check for device-facing endpoints. `required` with no
    /// known bits accepts any active token.
    pub fn check_bearer(&self, value: &str, required: Scope) -> Result<TokenRecord, AppError> {
        let record = match self.tokens.lookup(value) {
            Some(r) if r.is_active() && r.scope.contains(required) => r,
            _ => return Err(AppError::Forbidden),
        };
        self.tokens.log_access(&record);
        Ok(record)
    }

    // ── Peer admission ───────────────────────────────────────────

    /// Manual allow-list entry keyed by hardware address.
    pub fn allow_peer(&self, mac: &str, ip: IpAddr, replace: bool) -> Result<(), AppError> {
        let mac = normalize_mac(mac)?;
        let _commit = Self::lock_guard(&self.commit);
        self.peers.allow(PeerKey::Mac(mac), ip, replace, false)
    }

    /// Allow-list entry owned by an active WireGuard-scoped token.
    pub fn allow_peer_via_token(
        &self,
        value: &str,
        ip: IpAddr,
        replace: bool,
    ) -> Result<(), AppError> {
        let lock = self.token_lock(value);
        let _guard = Self::lock_guard(&lock);

        let record = self.tokens.lookup(value).ok_or(AppError::NotFound)?;
        if !record.is_active() {
            return Err(AppError::TokenNotActive);
        }
        if !record.scope.contains(Scope::WIREGUARD) {
            return Err(AppError::Forbidden);
        }

        let _commit = Self::lock_guard(&self.commit);
        self.peers
            .allow(PeerKey::Token(value.to_string()), ip, replace, true)?;
        self.tokens.set_peer_binding(value, ip);
        Ok(())
    }

    /// Idempotent removals.
    pub fn disallow_peer(&self, mac: &str) -> Result<bool, AppError> {
        let mac = normalize_mac(mac)?;
        let _commit = Self::lock_guard(&self.commit);
        Ok(self.peers.disallow(&PeerKey::Mac(mac)))
    }

    pub fn disallow_peer_token(&self, value: &str) -> bool {
        let _commit = Self::lock_guard(&self.commit);
        self.peers.disallow(&PeerKey::Token(value.to_string()))
    }

    /// One-shot WireGuard registration by a probe holding an active
    /// WireGuard-scoped token. Returns the ip assigned at activation.
    pub fn register_peer(
        &self,
        token: &TokenRecord,
        publickey: &str,
        mac: &str,
    ) -> Result<IpAddr, AppError> {
        let mac = normalize_mac(mac)?;

        let lock = self.token_lock(&token.value);
        let _guard = Self::lock_guard(&lock);

        let key = PeerKey::Token(token.value.clone());
        let ip = self.peers.register(&key, publickey)?;
        self.tokens.set_mac_if_absent(&token.value, &mac);
        Ok(ip)
    }

    // ── Probe operations ─────────────────────────────────────────

    pub fn register_probe(&self, mac: &str) -> Result<Probe, AppError> {
        self.probes.register(mac)
    }

    /// Gate every command dispatch on probe liveness.
    pub fn ensure_probe_active(&self, id: Uuid) -> Result<Probe, AppError> {
        self.probes.ensure_active(id)
    }

    // ── Tunnel tokens & SIM allowances ───────────────────────────

    pub fn create_tunnel_token(
        &self,
        scope_bits: u32,
        admin: bool,
    ) -> Result<TunnelToken, AppError> {
        let scope = self
            .policy
            .validate_tunnel(TunnelScope::from_bits(scope_bits), admin)?;
        self.tunnel_tokens.create(scope, admin)
    }

    /// Revoke a tunnel token and drop every SIM allowance it carried.
    pub fn revoke_tunnel_token(&self, id: i64) -> Result<(), AppError> {
        let _commit = Self::lock_guard(&self.commit);
        if !self.tunnel_tokens.mark_revoked(id) {
            return Err(AppError::NotFound);
        }
        let dropped = self.sims.revoke_for_token(id);
        tracing::info!(token = id, dropped, "tunnel token revoked");
        Ok(())
    }

    /// Grant SIM access under an active tunnel token.
    pub fn allow_sim(&self, token_id: i64, req: &SimRequest) -> Result<(), AppError> {
        // Liveness is checked under the commit lock so a concurrent
        // revocation cannot slip a grant in behind its cascade.
        let _commit = Self::lock_guard(&self.commit);

        let token = self
            .tunnel_tokens
            .get(token_id)
            .ok_or(AppError::TokenNotActive)?;
        if !token.is_active() {
            return Err(AppError::TokenNotActive);
        }
        if !token.admin {
            if req.provide && !token.scope.contains(TunnelScope::PROVIDER) {
                return Err(AppError::InvalidScope(token.scope.bits()));
            }
            if req.request && !token.scope.contains(TunnelScope::PROBE) {
                return Err(AppError::InvalidScope(token.scope.bits()));
            }
        }

        self.sims.allow(token_id, req)?;
        Ok(())
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new(StoreOptions::default())
    }
}
