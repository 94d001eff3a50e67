//! WireGuard peer admission: the allow-list mapping a probe (by mac or by
//! owning token) to its tunnel IP.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;

use crate::errors::AppError;
use crate::models::peer::{PeerAllowEntry, PeerKey};

pub struct PeerTable {
    entries: Mutex<HashMap<PeerKey, PeerAllowEntry>>,
}

impl PeerTable {
    pub fn new() -> PeerTable {
        PeerTable {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PeerKey, PeerAllowEntry>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_locked(
        entries: &HashMap<PeerKey, PeerAllowEntry>,
        key: &PeerKey,
        ip: IpAddr,
        replace: bool,
    ) -> Result<(), AppError> {
        if entries.iter().any(|(k, e)| e.ip == ip && k != key) {
            return Err(AppError::Conflict("ip is not unique".to_string()));
        }
        if let Some(existing) = entries.get(key) {
            if existing.ip != ip && !replace {
                return Err(AppError::Conflict(format!(
                    "peer is already allowed with ip {}",
                    existing.ip
                )));
            }
        }
        Ok(())
    }

    /// Conflict checks of [`allow`](Self::allow) without the insert. The
    /// store facade runs this before mutating sibling tables so a failed
    /// activation commits nothing.
    pub(super) fn check_allow(
        &self,
        key: &PeerKey,
        ip: IpAddr,
        replace: bool,
    ) -> Result<(), AppError> {
        Self::check_locked(&self.lock(), key, ip, replace)
    }

    /// Insert or replace an allow-list mapping. Re-allowing the same key
    /// with a different ip requires `replace`; an ip already claimed by a
    /// different key is always a conflict.
    pub fn allow(
        &self,
        key: PeerKey,
        ip: IpAddr,
        replace: bool,
        allow_registration: bool,
    ) -> Result<(), AppError> {
        let mut entries = self.lock();
        Self::check_locked(&entries, &key, ip, replace)?;

        entries.insert(
            key.clone(),
            PeerAllowEntry {
                key,
                ip,
                publickey: None,
                allow_registration,
                register_time: None,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Idempotent removal. Returns whether an entry existed.
    pub fn disallow(&self, key: &PeerKey) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn get(&self, key: &PeerKey) -> Option<PeerAllowEntry> {
        self.lock().get(key).cloned()
    }

    pub fn list(&self) -> Vec<PeerAllowEntry> {
        let mut all: Vec<PeerAllowEntry> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// One-shot peer registration: store the probe's public key and
    /// consume the `allow_registration` flag. Returns the assigned ip.
    pub(super) fn register(&self, key: &PeerKey, publickey: &str) -> Result<IpAddr, AppError> {
        validate_publickey(publickey)?;

        let mut entries = self.lock();
        let entry = entries.get_mut(key).ok_or(AppError::NotFound)?;
        if !entry.allow_registration {
            return Err(AppError::Forbidden);
        }
        entry.publickey = Some(publickey.to_string());
        entry.allow_registration = false;
        entry.register_time = Some(Utc::now());
        Ok(entry.ip)
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        PeerTable::new()
    }
}

fn validate_publickey(publickey: &str) -> Result<(), AppError> {
    match BASE64.decode(publickey) {
        Ok(raw) if raw.len() == 32 => Ok(()),
        _ => Err(AppError::InvalidValue(
            "publickey must be base64 of 32 bytes".to_string(),
        )),
    }
}
