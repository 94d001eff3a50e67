use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::AppError;

/// A token-scoped grant for one SIM resource, identified by IMSI and/or
/// ICCID. Lives until its tunnel token is revoked.
#[derive(Debug, Clone, Serialize)]
pub struct SimAllowance {
    pub id: i64,
    /// Id of the owning tunnel token.
    pub token_id: i64,
    pub imsi: Option<String>,
    pub iccid: Option<String>,
    /// Visible to other probes.
    pub public: bool,
    pub provide: bool,
    pub request: bool,
    pub created_at: DateTime<Utc>,
}

/// IMSI/ICCID shape: 5–20 decimal digits.
pub fn validate_identifier(kind: &str, value: &str) -> Result<(), AppError> {
    if value.len() < 5 || value.len() > 20 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::InvalidValue(format!(
            "{kind} must be 5-20 digits"
        )));
    }
    Ok(())
}
