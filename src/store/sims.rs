//! SIM allowances: token-scoped grants keyed by IMSI/ICCID.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use chrono::Utc;

use crate::errors::AppError;
use crate::models::sim::{validate_identifier, SimAllowance};

#[derive(Debug, Clone)]
pub struct SimRequest {
    pub imsi: Option<String>,
    pub iccid: Option<String>,
    pub public: bool,
    pub provide: bool,
    pub request: bool,
}

pub struct SimTable {
    entries: Mutex<Vec<SimAllowance>>,
    next_id: AtomicI64,
}

impl SimTable {
    pub fn new() -> SimTable {
        SimTable {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SimAllowance>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Grant (or re-grant) access to a SIM. Upsert per token+identifier:
    /// re-allowing overwrites the flags; an identifier owned by a
    /// different token is a conflict. Token liveness is the caller's
    /// check — this table only knows identifiers.
    pub fn allow(&self, token_id: i64, req: &SimRequest) -> Result<SimAllowance, AppError> {
        if req.imsi.is_none() && req.iccid.is_none() {
            return Err(AppError::MissingIdentifier);
        }
        if let Some(imsi) = &req.imsi {
            validate_identifier("imsi", imsi)?;
        }
        if let Some(iccid) = &req.iccid {
            validate_identifier("iccid", iccid)?;
        }

        let mut entries = self.lock();

        let same_identifier = |e: &SimAllowance| {
            (req.imsi.is_some() && e.imsi == req.imsi)
                || (req.iccid.is_some() && e.iccid == req.iccid)
        };

        if entries
            .iter()
            .any(|e| same_identifier(e) && e.token_id != token_id)
        {
            return Err(AppError::Conflict(
                "imsi or iccid already exists".to_string(),
            ));
        }

        if let Some(existing) = entries
            .iter_mut()
            .find(|e| same_identifier(e) && e.token_id == token_id)
        {
            existing.public = req.public;
            existing.provide = req.provide;
            existing.request = req.request;
            return Ok(existing.clone());
        }

        let allowance = SimAllowance {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            token_id,
            imsi: req.imsi.clone(),
            iccid: req.iccid.clone(),
            public: req.public,
            provide: req.provide,
            request: req.request,
            created_at: Utc::now(),
        };
        entries.push(allowance.clone());
        Ok(allowance)
    }

    /// Cascade for tunnel-token revocation. Returns how many grants fell.
    pub(super) fn revoke_for_token(&self, token_id: i64) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.token_id != token_id);
        before - entries.len()
    }

    pub fn list(&self) -> Vec<SimAllowance> {
        self.lock().clone()
    }

    pub fn list_for_token(&self, token_id: i64) -> Vec<SimAllowance> {
        self.lock()
            .iter()
            .filter(|e| e.token_id == token_id)
            .cloned()
            .collect()
    }
}

impl Default for SimTable {
    fn default() -> Self {
        SimTable::new()
    }
}
