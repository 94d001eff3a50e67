//! Probe registry: identity, metadata, and the operational state machine
//! gating command dispatch.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::probe::{normalize_mac, Probe, ProbeStatus, StartupLogEntry};

/// Upper bound on retained startup-log entries.
const STARTUP_LOG_CAP: usize = 500;

pub struct ProbeRegistry {
    probes: DashMap<Uuid, Probe>,
    /// Lowercase mac → probe id. Uniqueness is enforced here.
    by_mac: DashMap<String, Uuid>,
    startup_log: Mutex<VecDeque<StartupLogEntry>>,
    name_max_len: usize,
}

impl ProbeRegistry {
    pub fn new(name_max_len: usize) -> ProbeRegistry {
        ProbeRegistry {
            probes: DashMap::new(),
            by_mac: DashMap::new(),
            startup_log: Mutex::new(VecDeque::new()),
            name_max_len,
        }
    }

    /// Register a probe by hardware address. The mac is immutable once
    /// registered; a repeat registration is `DuplicateMac` regardless of
    /// letter case.
    pub fn register(&self, mac: &str) -> Result<Probe, AppError> {
        let mac = normalize_mac(mac)?;
        match self.by_mac.entry(mac.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::DuplicateMac(mac)),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let probe = Probe {
                    id: Uuid::new_v4(),
                    mac: Some(mac),
                    name: None,
                    country: None,
                    status: ProbeStatus::Registered,
                    token_value: None,
                    last_poll: None,
                    created_at: Utc::now(),
                };
                e.insert(probe.id);
                self.probes.insert(probe.id, probe.clone());
                Ok(probe)
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Probe> {
        self.probes.get(&id).map(|p| p.clone())
    }

    pub fn get_by_mac(&self, mac: &str) -> Option<Probe> {
        let mac = mac.to_ascii_lowercase();
        let id = *self.by_mac.get(&mac)?;
        self.get(id)
    }

    pub fn list(&self) -> Vec<Probe> {
        let mut all: Vec<Probe> = self.probes.iter().map(|p| p.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// `Registered -> Active`. Activating an Active probe is a no-op ack;
    /// a Deactivated probe never comes back.
    pub fn activate(&self, id: Uuid) -> Result<(), AppError> {
        let mut probe = self.probes.get_mut(&id).ok_or(AppError::NotFound)?;
        match probe.status {
            ProbeStatus::Registered => {
                probe.status = ProbeStatus::Active;
                Ok(())
            }
            ProbeStatus::Active => Ok(()),
            ProbeStatus::Deactivated => Err(AppError::Conflict(
                "probe is deactivated and cannot be reactivated".to_string(),
            )),
        }
    }

    /// Terminal in any state; idempotent.
    pub fn deactivate(&self, id: Uuid) -> Result<(), AppError> {
        let mut probe = self.probes.get_mut(&id).ok_or(AppError::NotFound)?;
        probe.status = ProbeStatus::Deactivated;
        Ok(())
    }

    /// Metadata change, permitted in any status. Names are unique across
    /// the registry.
    pub fn change_name(&self, id: Uuid, name: &str) -> Result<(), AppError> {
        let name = self.validate_name(name)?;
        self.ensure_name_free(&name, Some(id))?;
        let mut probe = self.probes.get_mut(&id).ok_or(AppError::NotFound)?;
        probe.name = Some(name);
        Ok(())
    }

    /// Metadata change, permitted in any status.
    pub fn change_country(&self, id: Uuid, country: &str) -> Result<(), AppError> {
        let country = country.trim().to_ascii_uppercase();
        if country.len() != 2 || !country.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(AppError::InvalidValue(
                "country must be an ISO 3166-1 alpha-2 code".to_string(),
            ));
        }
        let mut probe = self.probes.get_mut(&id).ok_or(AppError::NotFound)?;
        probe.country = Some(country);
        Ok(())
    }

    /// Gate for command dispatch: only Active probes execute anything.
    pub fn ensure_active(&self, id: Uuid) -> Result<Probe, AppError> {
        let probe = self.get(id).ok_or(AppError::NotFound)?;
        if probe.status != ProbeStatus::Active {
            return Err(AppError::ProbeNotActive);
        }
        Ok(probe)
    }

    pub fn touch_poll(&self, id: Uuid) {
        if let Some(mut probe) = self.probes.get_mut(&id) {
            probe.last_poll = Some(Utc::now());
        }
    }

    pub fn log_startup(&self, probe_id: Uuid, mac: &str) {
        let mut log = match self.startup_log.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        log.push_back(StartupLogEntry {
            probe_id,
            mac: mac.to_string(),
            timestamp: Utc::now(),
        });
        while log.len() > STARTUP_LOG_CAP {
            log.pop_front();
        }
    }

    pub fn startup_log(&self) -> Vec<StartupLogEntry> {
        match self.startup_log.lock() {
            Ok(g) => g.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    fn validate_name(&self, name: &str) -> Result<String, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidValue("name must not be empty".to_string()));
        }
        if name.len() > self.name_max_len {
            return Err(AppError::InvalidValue(format!(
                "name must be at most {} characters",
                self.name_max_len
            )));
        }
        Ok(name.to_string())
    }

    fn ensure_name_free(&self, name: &str, except: Option<Uuid>) -> Result<(), AppError> {
        let taken = self
            .probes
            .iter()
            .any(|p| p.name.as_deref() == Some(name) && Some(p.id) != except);
        if taken {
            return Err(AppError::Conflict("probe name is not unique".to_string()));
        }
        Ok(())
    }

    /// Checks of [`bind_token`](Self::bind_token) without the mutation,
    /// run by the store facade before it commits anything.
    pub(super) fn check_bind(&self, name: &str, mac: Option<&str>) -> Result<(), AppError> {
        let name = self.validate_name(name)?;
        let except = mac.and_then(|m| self.get_by_mac(m)).map(|p| p.id);
        self.ensure_name_free(&name, except)
    }

    /// Token activation binding: attach name and owning token to the probe
    /// registered under `mac`, or create a fresh probe when the token was
    /// never tied to a hardware address. Fallible checks run before any
    /// mutation so a failed activation leaves the registry untouched.
    pub(super) fn bind_token(
        &self,
        name: &str,
        mac: Option<&str>,
        token_value: &str,
    ) -> Result<Uuid, AppError> {
        let name = self.validate_name(name)?;

        if let Some(existing) = mac.and_then(|m| self.get_by_mac(m)) {
            self.ensure_name_free(&name, Some(existing.id))?;
            if let Some(mut probe) = self.probes.get_mut(&existing.id) {
                probe.name = Some(name);
                probe.token_value = Some(token_value.to_string());
            }
            return Ok(existing.id);
        }

        self.ensure_name_free(&name, None)?;
        let probe = Probe {
            id: Uuid::new_v4(),
            mac: mac.map(|m| m.to_string()),
            name: Some(name),
            country: None,
            status: ProbeStatus::Registered,
            token_value: Some(token_value.to_string()),
            last_poll: None,
            created_at: Utc::now(),
        };
        let id = probe.id;
        if let Some(m) = &probe.mac {
            self.by_mac.insert(m.clone(), id);
        }
        self.probes.insert(id, probe);
        Ok(id)
    }
}
