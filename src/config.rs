use serde::Deserialize;

use crate::models::scope::ScopePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub admin_key: String,
    /// Permitted known-bit scope combinations for token candidates.
    /// Set via PROBEGATE_SCOPE_POLICY (comma-separated). Default: 1,2,3.
    pub scope_policy: Vec<u32>,
    /// Upper bound on probe name length at activation/rename.
    pub name_max_len: usize,
    /// How many unactivated token candidates are retained.
    pub max_candidates: usize,
    /// Validity window of a revocation confirmation phrase, seconds.
    pub confirm_ttl_secs: u64,
    /// Probe long-poll window, seconds.
    pub poll_interval_secs: u64,
    pub wireguard: WireguardConfig,
}

/// Client-facing tunnel parameters handed out on peer registration.
#[derive(Debug, Clone, Deserialize)]
pub struct WireguardConfig {
    pub endpoint: String,
    pub endpoint_publickey: String,
    pub allowed_ips: String,
    pub dns: String,
}

impl Config {
    pub fn scope_policy(&self) -> ScopePolicy {
        ScopePolicy::new(self.scope_policy.clone())
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let admin_key =
        std::env::var("PROBEGATE_ADMIN_KEY").unwrap_or_else(|_| "CHANGE_ME_ADMIN_KEY".into());

    if admin_key == "CHANGE_ME_ADMIN_KEY" {
        let env_mode = std::env::var("PROBEGATE_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "PROBEGATE_ADMIN_KEY is still the insecure placeholder. \
                 Set a proper key before running in production."
            );
        }
        eprintln!("⚠️  PROBEGATE_ADMIN_KEY is not set — using insecure placeholder. Set a real key for production.");
    }

    let scope_policy = std::env::var("PROBEGATE_SCOPE_POLICY")
        .unwrap_or_else(|_| "1,2,3".into())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("invalid PROBEGATE_SCOPE_POLICY: {e}"))?;

    Ok(Config {
        port: std::env::var("PROBEGATE_PORT")
            .unwrap_or_else(|_| "8443".into())
            .parse()
            .unwrap_or(8443),
        admin_key,
        scope_policy,
        name_max_len: std::env::var("PROBEGATE_NAME_MAX_LEN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(64),
        max_candidates: std::env::var("PROBEGATE_MAX_CANDIDATES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10),
        confirm_ttl_secs: std::env::var("PROBEGATE_CONFIRM_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(600),
        poll_interval_secs: std::env::var("PROBEGATE_POLL_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
        wireguard: WireguardConfig {
            endpoint: std::env::var("PROBEGATE_WG_ENDPOINT")
                .unwrap_or_else(|_| "vpn.example.org:51820".into()),
            endpoint_publickey: std::env::var("PROBEGATE_WG_PUBLIC_KEY").unwrap_or_default(),
            allowed_ips: std::env::var("PROBEGATE_WG_ALLOWED_IPS")
                .unwrap_or_else(|_| "10.0.0.0/16".into()),
            dns: std::env::var("PROBEGATE_WG_DNS").unwrap_or_else(|_| "10.0.0.1".into()),
        },
    })
}

/// Config with harmless defaults for tests and local tooling.
pub fn for_tests() -> Config {
    Config {
        port: 0,
        admin_key: "test-admin-key".into(),
        scope_policy: vec![1, 2, 3],
        name_max_len: 64,
        max_candidates: 10,
        confirm_ttl_secs: 600,
        poll_interval_secs: 1,
        wireguard: WireguardConfig {
            endpoint: "vpn.test:51820".into(),
            endpoint_publickey: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".into(),
            allowed_ips: "10.0.0.0/16".into(),
            dns: "10.0.0.1".into(),
        },
    }
}
