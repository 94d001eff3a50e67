//! Token tables: management tokens (candidate/active/revoked), tunnel
//! tokens, revocation challenges, and the bounded access log.
//!
//! This module owns every token state transition. Cross-component effects
//! of a transition (peer-allow entries, probe bindings) are coordinated by
//! the [`Store`](crate::store::Store) facade, which serializes all
//! operations on a single token value.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::models::scope::{Scope, TunnelScope};
use crate::models::token::{
    AccessLogEntry, BoundResource, TokenAction, TokenRecord, TokenStatus, TunnelToken,
};

/// Raw token length in bytes. 256 bits of entropy from the OS generator.
const TOKEN_BYTES: usize = 32;

/// Draws before a value collision is reported as `Unavailable`. With a
/// 256-bit value space this never triggers outside of a broken RNG.
const MAX_DRAWS: usize = 4;

/// Upper bound on retained access-log entries.
const ACCESS_LOG_CAP: usize = 1000;

/// Draw a fresh token value: base64 of 32 bytes from the OS generator.
pub fn generate_value() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut buf);
    BASE64.encode(buf)
}

/// Caller-supplied candidate values must decode to exactly 32 bytes.
pub fn validate_value(value: &str) -> Result<(), AppError> {
    match BASE64.decode(value) {
        Ok(raw) if raw.len() == TOKEN_BYTES => Ok(()),
        _ => Err(AppError::InvalidValue(
            "token must be base64 of 32 bytes".to_string(),
        )),
    }
}

struct Challenge {
    phrase: String,
    issued: Instant,
}

pub struct TokenTable {
    tokens: DashMap<String, TokenRecord>,
    challenges: DashMap<String, Challenge>,
    log: Mutex<VecDeque<AccessLogEntry>>,
    confirm_ttl: Duration,
    max_candidates: usize,
}

impl TokenTable {
    pub fn new(confirm_ttl: Duration, max_candidates: usize) -> TokenTable {
        TokenTable {
            tokens: DashMap::new(),
            challenges: DashMap::new(),
            log: Mutex::new(VecDeque::new()),
            confirm_ttl,
            max_candidates,
        }
    }

    /// Generate a fresh candidate. Collisions are retried internally with
    /// a new draw; scope has already passed the deployment policy.
    pub fn create_candidate(
        &self,
        scope: Scope,
        mac: Option<String>,
    ) -> Result<TokenRecord, AppError> {
        for _ in 0..MAX_DRAWS {
            let value = generate_value();
            match self.tokens.entry(value.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(e) => {
                    let record = TokenRecord {
                        value: value.clone(),
                        scope,
                        status: TokenStatus::Candidate,
                        bound: None,
                        mac,
                        created_at: Utc::now(),
                    };
                    e.insert(record.clone());
                    self.log_action(&value, scope, TokenAction::Registered);
                    return Ok(record);
                }
            }
        }
        tracing::error!("token value collided {} times in a row", MAX_DRAWS);
        Err(AppError::Unavailable)
    }

    /// Insert a device-submitted candidate. The device picked the value,
    /// so a collision is a hard `Conflict` rather than a retry.
    pub fn register_candidate(
        &self,
        value: &str,
        scope: Scope,
        mac: Option<String>,
    ) -> Result<TokenRecord, AppError> {
        validate_value(value)?;
        match self.tokens.entry(value.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(AppError::Conflict("token already exists".to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let record = TokenRecord {
                    value: value.to_string(),
                    scope,
                    status: TokenStatus::Candidate,
                    bound: None,
                    mac,
                    created_at: Utc::now(),
                };
                e.insert(record.clone());
                self.log_action(value, scope, TokenAction::Registered);
                Ok(record)
            }
        }
    }

    /// Drop the oldest unactivated candidates beyond the retention cap.
    /// Returns how many were removed.
    pub fn prune_candidates(&self) -> usize {
        let mut candidates: Vec<(String, chrono::DateTime<Utc>)> = self
            .tokens
            .iter()
            .filter(|r| r.status == TokenStatus::Candidate)
            .map(|r| (r.value.clone(), r.created_at))
            .collect();

        if candidates.len() <= self.max_candidates {
            return 0;
        }

        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        let stale = candidates.split_off(self.max_candidates);
        for (value, _) in &stale {
            self.tokens
                .remove_if(value, |_, r| r.status == TokenStatus::Candidate);
        }
        stale.len()
    }

    pub fn lookup(&self, value: &str) -> Option<TokenRecord> {
        self.tokens.get(value).map(|r| r.clone())
    }

    pub fn list(&self) -> Vec<TokenRecord> {
        let mut all: Vec<TokenRecord> = self.tokens.iter().map(|r| r.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Flip a validated candidate to Active and attach its resource.
    /// The caller holds the per-token lock and has performed every
    /// fallible check; this step cannot fail part-way.
    pub(super) fn commit_activation(&self, value: &str, scope: Scope, bound: BoundResource) {
        if let Some(mut record) = self.tokens.get_mut(value) {
            record.status = TokenStatus::Active;
            record.scope = scope;
            record.bound = Some(bound);
        }
        self.log_action(value, scope, TokenAction::Activated);
    }

    /// Mark a token Revoked and clear its binding. Caller holds the
    /// per-token lock and has already detached bound resources.
    pub(super) fn commit_revocation(&self, value: &str) {
        let scope = match self.tokens.get_mut(value) {
            Some(mut record) => {
                record.status = TokenStatus::Revoked;
                record.bound = None;
                record.scope
            }
            None => return,
        };
        self.challenges.remove(value);
        self.log_action(value, scope, TokenAction::Deactivated);
    }

    /// Merge a (re-)allowed peer ip into an active token's binding.
    pub(super) fn set_peer_binding(&self, value: &str, ip: std::net::IpAddr) {
        if let Some(mut record) = self.tokens.get_mut(value) {
            record.bound = Some(match record.bound.take().and_then(|b| b.probe_id()) {
                Some(id) => BoundResource::PeerAndProbe { ip, id },
                None => BoundResource::Peer { ip },
            });
        }
    }

    pub(super) fn set_mac_if_absent(&self, value: &str, mac: &str) {
        if let Some(mut record) = self.tokens.get_mut(value) {
            if record.mac.is_none() {
                record.mac = Some(mac.to_string());
            }
        }
    }

    /// Issue (or replace) the revocation confirmation phrase for a token.
    /// The phrase is a short-lived nonce, not a secret.
    pub fn issue_challenge(&self, value: &str) -> Result<String, AppError> {
        if !self.tokens.contains_key(value) {
            return Err(AppError::NotFound);
        }
        let mut buf = [0u8; 4];
        OsRng.fill_bytes(&mut buf);
        let phrase = format!("revoke-{}", hex::encode(buf));
        self.challenges.insert(
            value.to_string(),
            Challenge {
                phrase: phrase.clone(),
                issued: Instant::now(),
            },
        );
        Ok(phrase)
    }

    /// Check a supplied confirmation phrase against the issued one.
    /// Single use: a successful check consumes the challenge.
    pub(super) fn verify_challenge(&self, value: &str, supplied: &str) -> Result<(), AppError> {
        let matches = match self.challenges.get(value) {
            None => return Err(AppError::ConfirmationMismatch),
            Some(challenge) => {
                if challenge.issued.elapsed() > self.confirm_ttl {
                    drop(challenge);
                    self.challenges.remove(value);
                    return Err(AppError::ConfirmationExpired);
                }
                bool::from(
                    challenge
                        .phrase
                        .as_bytes()
                        .ct_eq(supplied.trim().as_bytes()),
                )
            }
        };

        if !matches {
            return Err(AppError::ConfirmationMismatch);
        }
        self.challenges.remove(value);
        Ok(())
    }

    /// Record a bearer access for auditing.
    pub fn log_access(&self, record: &TokenRecord) {
        self.log_action(&record.value, record.scope, TokenAction::Access);
    }

    fn log_action(&self, value: &str, scope: Scope, action: TokenAction) {
        let mut log = match self.log.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        log.push_back(AccessLogEntry {
            token_value: value.to_string(),
            scope,
            action,
            time: Utc::now(),
        });
        while log.len() > ACCESS_LOG_CAP {
            log.pop_front();
        }
    }

    pub fn access_log(&self) -> Vec<AccessLogEntry> {
        match self.log.lock() {
            Ok(g) => g.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

/// Tunnel tokens are created active by an admin and keyed by a small
/// integer id so SIM allowances can reference them.
pub struct TunnelTable {
    tokens: DashMap<i64, TunnelToken>,
    by_value: DashMap<String, i64>,
    next_id: AtomicI64,
}

impl TunnelTable {
    pub fn new() -> TunnelTable {
        TunnelTable {
            tokens: DashMap::new(),
            by_value: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn create(&self, scope: TunnelScope, admin: bool) -> Result<TunnelToken, AppError> {
        for _ in 0..MAX_DRAWS {
            let value = generate_value();
            match self.by_value.entry(value.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(e) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let token = TunnelToken {
                        id,
                        value,
                        scope,
                        admin,
                        revoked: false,
                        expires: None,
                        created_at: Utc::now(),
                    };
                    e.insert(id);
                    self.tokens.insert(id, token.clone());
                    return Ok(token);
                }
            }
        }
        Err(AppError::Unavailable)
    }

    pub fn get(&self, id: i64) -> Option<TunnelToken> {
        self.tokens.get(&id).map(|t| t.clone())
    }

    pub fn get_by_value(&self, value: &str) -> Option<TunnelToken> {
        let id = *self.by_value.get(value)?;
        self.get(id)
    }

    /// Idempotent. Returns false when the id is unknown.
    pub(super) fn mark_revoked(&self, id: i64) -> bool {
        match self.tokens.get_mut(&id) {
            Some(mut token) => {
                token.revoked = true;
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<TunnelToken> {
        let mut all: Vec<TunnelToken> = self.tokens.iter().map(|t| t.clone()).collect();
        all.sort_by_key(|t| t.id);
        all
    }
}

impl Default for TunnelTable {
    fn default() -> Self {
        TunnelTable::new()
    }
}
