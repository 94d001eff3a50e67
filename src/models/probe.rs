use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;

static MAC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{2}(:[0-9a-f]{2}){5}$").unwrap());

/// Normalize and validate a hardware address. Comparison throughout the
/// registry is on the lowercase form.
pub fn normalize_mac(mac: &str) -> Result<String, AppError> {
    let mac = mac.trim().to_ascii_lowercase();
    if !MAC_RE.is_match(&mac) {
        return Err(AppError::InvalidValue(format!("malformed mac: {mac}")));
    }
    Ok(mac)
}

/// Probe operational status.
///
/// `Registered --activate--> Active --deactivate--> Deactivated`;
/// a probe may be deactivated from any status and no transition leaves
/// Deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Registered,
    Active,
    Deactivated,
}

/// A measurement probe, identified by its immutable hardware address.
#[derive(Debug, Clone, Serialize)]
pub struct Probe {
    pub id: Uuid,
    /// Lowercase, immutable after registration.
    pub mac: Option<String>,
    pub name: Option<String>,
    /// ISO 3166-1 alpha-2.
    pub country: Option<String>,
    pub status: ProbeStatus,
    /// Value of the token that authorized this probe, if any.
    pub token_value: Option<String>,
    pub last_poll: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Probe {
    /// Whether the probe checked in within the long-poll window.
    pub fn is_polling(&self, interval: Duration) -> bool {
        match self.last_poll {
            None => false,
            Some(t) => t + interval > Utc::now(),
        }
    }
}

/// One service-startup report from a probe.
#[derive(Debug, Clone, Serialize)]
pub struct StartupLogEntry {
    pub probe_id: Uuid,
    pub mac: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("AA:BB:CC:00:11:22").unwrap(),
            "aa:bb:cc:00:11:22"
        );
        assert_eq!(
            normalize_mac("  aa:bb:cc:00:11:22 ").unwrap(),
            "aa:bb:cc:00:11:22"
        );
        assert!(normalize_mac("aa-bb-cc-00-11-22").is_err());
        assert!(normalize_mac("aa:bb:cc:00:11").is_err());
        assert!(normalize_mac("zz:bb:cc:00:11:22").is_err());
        assert!(normalize_mac("").is_err());
    }

    #[test]
    fn test_is_polling_window() {
        let mut probe = Probe {
            id: Uuid::new_v4(),
            mac: Some("aa:bb:cc:00:11:22".to_string()),
            name: None,
            country: None,
            status: ProbeStatus::Registered,
            token_value: None,
            last_poll: None,
            created_at: Utc::now(),
        };
        let interval = Duration::seconds(60);
        assert!(!probe.is_polling(interval));

        probe.last_poll = Some(Utc::now());
        assert!(probe.is_polling(interval));

        probe.last_poll = Some(Utc::now() - Duration::seconds(120));
        assert!(!probe.is_polling(interval));
    }
}
