//! Capability scope bitmasks for management and tunnel tokens.
//!
//! A scope is a forward-compatible bitmask: unknown high bits decode
//! without error and survive re-encoding, but only the known bits decide
//! which activation fields are required. This replaces ad hoc `scope & 1`
//! tests at call sites with one codec.

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Scope of a management token (probe registration / WireGuard admission).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(u32);

impl Scope {
    /// Bit 0: token admits a WireGuard peer; activation requires `ip`.
    pub const WIREGUARD: Scope = Scope(1);
    /// Bit 1: token identifies a probe; activation requires `name`.
    pub const PROBE: Scope = Scope(2);

    const KNOWN: u32 = Self::WIREGUARD.0 | Self::PROBE.0;

    pub fn from_bits(bits: u32) -> Scope {
        Scope(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Scope) -> bool {
        self.0 & other.0 == other.0
    }

    /// The scope restricted to bits this build understands.
    pub fn known(self) -> u32 {
        self.0 & Self::KNOWN
    }

    /// Field names an activation request MUST carry for this scope.
    /// Pure function of the known bits.
    pub fn required_fields(self) -> &'static [&'static str] {
        match (self.contains(Self::WIREGUARD), self.contains(Self::PROBE)) {
            (true, true) => &["ip", "name"],
            (true, false) => &["ip"],
            (false, true) => &["name"],
            (false, false) => &[],
        }
    }

    /// Whether an activation request MAY carry the given field.
    pub fn is_field_allowed(self, field: &str) -> bool {
        match field {
            "ip" => self.contains(Self::WIREGUARD),
            "name" => self.contains(Self::PROBE),
            _ => false,
        }
    }

    pub fn pretty(self) -> String {
        let mut parts = Vec::new();
        if self.contains(Self::WIREGUARD) {
            parts.push("Wireguard");
        }
        if self.contains(Self::PROBE) {
            parts.push("Probe");
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(" | ")
        }
    }
}

/// Scope of a tunnel token (SIM tunnel access).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TunnelScope(u32);

impl TunnelScope {
    /// Bit 0: token may act as a probe (request SIMs).
    pub const PROBE: TunnelScope = TunnelScope(1);
    /// Bit 1: token may act as a provider (provide SIMs).
    pub const PROVIDER: TunnelScope = TunnelScope(2);

    const KNOWN: u32 = Self::PROBE.0 | Self::PROVIDER.0;

    pub fn from_bits(bits: u32) -> TunnelScope {
        TunnelScope(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: TunnelScope) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn known(self) -> u32 {
        self.0 & Self::KNOWN
    }
}

/// Deployment policy for permitted scope combinations.
///
/// The set of combinations a deployment accepts is configuration, not code:
/// a candidate whose known bits are not listed here is rejected with
/// `InvalidScope` before any state is created.
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    permitted: Vec<u32>,
}

impl ScopePolicy {
    pub fn new(permitted: Vec<u32>) -> ScopePolicy {
        ScopePolicy { permitted }
    }

    /// Check a declared scope against the policy table. Unknown high bits
    /// are ignored for the check but preserved in the returned scope.
    pub fn validate(&self, scope: Scope) -> Result<Scope, AppError> {
        let known = scope.known();
        if known == 0 || !self.permitted.contains(&known) {
            return Err(AppError::InvalidScope(scope.bits()));
        }
        Ok(scope)
    }

    pub fn validate_tunnel(&self, scope: TunnelScope, admin: bool) -> Result<TunnelScope, AppError> {
        // Admin tunnel tokens bypass per-probe scoping entirely.
        if !admin && scope.known() == 0 {
            return Err(AppError::InvalidScope(scope.bits()));
        }
        Ok(scope)
    }
}

impl Default for ScopePolicy {
    fn default() -> Self {
        ScopePolicy {
            permitted: vec![
                Scope::WIREGUARD.bits(),
                Scope::PROBE.bits(),
                Scope::WIREGUARD.bits() | Scope::PROBE.bits(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_fields_by_bits() {
        assert_eq!(Scope::from_bits(0).required_fields(), &[] as &[&str]);
        assert_eq!(Scope::from_bits(1).required_fields(), &["ip"]);
        assert_eq!(Scope::from_bits(2).required_fields(), &["name"]);
        assert_eq!(Scope::from_bits(3).required_fields(), &["ip", "name"]);
    }

    #[test]
    fn test_required_fields_deterministic() {
        for bits in 0..16 {
            let a = Scope::from_bits(bits).required_fields();
            let b = Scope::from_bits(bits).required_fields();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_unknown_high_bits_ignored_but_preserved() {
        let scope = Scope::from_bits(0x80000001);
        assert_eq!(scope.required_fields(), &["ip"]);
        assert!(scope.is_field_allowed("ip"));
        assert!(!scope.is_field_allowed("name"));
        // re-encoding keeps the reserved bits intact
        assert_eq!(scope.bits(), 0x80000001);

        let json = serde_json::to_string(&scope).unwrap();
        let back: Scope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bits(), 0x80000001);
    }

    #[test]
    fn test_field_allowed_matches_bits() {
        assert!(Scope::WIREGUARD.is_field_allowed("ip"));
        assert!(!Scope::WIREGUARD.is_field_allowed("name"));
        assert!(Scope::PROBE.is_field_allowed("name"));
        assert!(!Scope::PROBE.is_field_allowed("ip"));
        assert!(!Scope::PROBE.is_field_allowed("publickey"));
    }

    #[test]
    fn test_policy_rejects_unlisted_combination() {
        let policy = ScopePolicy::new(vec![1, 2]);
        assert!(policy.validate(Scope::from_bits(1)).is_ok());
        assert!(policy.validate(Scope::from_bits(2)).is_ok());
        assert!(matches!(
            policy.validate(Scope::from_bits(3)),
            Err(AppError::InvalidScope(3))
        ));
    }

    #[test]
    fn test_policy_rejects_empty_scope() {
        let policy = ScopePolicy::default();
        assert!(matches!(
            policy.validate(Scope::from_bits(0)),
            Err(AppError::InvalidScope(0))
        ));
        // reserved bits alone do not grant anything
        assert!(matches!(
            policy.validate(Scope::from_bits(0x100)),
            Err(AppError::InvalidScope(_))
        ));
    }

    #[test]
    fn test_tunnel_scope_admin_bypass() {
        let policy = ScopePolicy::default();
        assert!(policy.validate_tunnel(TunnelScope::from_bits(0), true).is_ok());
        assert!(policy.validate_tunnel(TunnelScope::from_bits(0), false).is_err());
        assert!(policy.validate_tunnel(TunnelScope::PROVIDER, false).is_ok());
    }

    #[test]
    fn test_pretty() {
        assert_eq!(Scope::from_bits(3).pretty(), "Wireguard | Probe");
        assert_eq!(Scope::from_bits(0).pretty(), "none");
    }
}
