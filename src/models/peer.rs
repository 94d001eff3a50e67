use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a peer-allow entry is keyed: by probe hardware address (manual
/// admin entries) or by the value of the token that was activated for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKey {
    Mac(String),
    Token(String),
}

/// One entry of the WireGuard allow-list.
#[derive(Debug, Clone, Serialize)]
pub struct PeerAllowEntry {
    pub key: PeerKey,
    pub ip: IpAddr,
    /// Base64 WireGuard public key, stored once the probe registers.
    pub publickey: Option<String>,
    /// One-shot flag: set at token activation, consumed by the probe's
    /// registration call.
    pub allow_registration: bool,
    pub register_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Client-side tunnel parameters returned to a freshly registered peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerConfig {
    pub ip: String,
    pub endpoint: String,
    pub endpoint_publickey: String,
    pub allowed_ips: String,
    pub dns: String,
}
