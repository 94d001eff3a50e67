use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::scope::{Scope, TunnelScope};

/// Lifecycle of a management token. Transitions are monotonic:
/// Candidate → Active → Revoked, no cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Candidate,
    Active,
    Revoked,
}

/// Resource a token was bound to at activation. Present iff the token
/// is Active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundResource {
    Peer { ip: IpAddr },
    Probe { id: Uuid },
    PeerAndProbe { ip: IpAddr, id: Uuid },
}

impl BoundResource {
    pub fn peer_ip(&self) -> Option<IpAddr> {
        match self {
            BoundResource::Peer { ip } | BoundResource::PeerAndProbe { ip, .. } => Some(*ip),
            BoundResource::Probe { .. } => None,
        }
    }

    pub fn probe_id(&self) -> Option<Uuid> {
        match self {
            BoundResource::Probe { id } | BoundResource::PeerAndProbe { id, .. } => Some(*id),
            BoundResource::Peer { .. } => None,
        }
    }
}

/// A management token record, keyed by its opaque value.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRecord {
    pub value: String,
    pub scope: Scope,
    pub status: TokenStatus,
    /// Set at activation, cleared at revocation.
    pub bound: Option<BoundResource>,
    /// Hardware address supplied at device self-registration, if any.
    /// Lowercase-normalized.
    pub mac: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TokenRecord {
    pub fn is_active(&self) -> bool {
        self.status == TokenStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenAction {
    Registered,
    Activated,
    Access,
    Deactivated,
}

/// One entry of the bounded token access log.
#[derive(Debug, Clone, Serialize)]
pub struct AccessLogEntry {
    pub token_value: String,
    pub scope: Scope,
    pub action: TokenAction,
    pub time: DateTime<Utc>,
}

/// A tunnel token authorizing SIM-tunnel access. Created active by an
/// admin; admin tokens bypass per-probe scoping.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelToken {
    pub id: i64,
    pub value: String,
    pub scope: TunnelScope,
    pub admin: bool,
    pub revoked: bool,
    pub expires: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TunnelToken {
    pub fn expired(&self) -> bool {
        self.expires.is_some_and(|e| Utc::now() > e)
    }

    pub fn is_active(&self) -> bool {
        !self.revoked && !self.expired()
    }
}
