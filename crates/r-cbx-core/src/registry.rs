//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-identity session records and the discovery catalog."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use r_cbx_common::UseCase;
use r_cbx_msg::{EntityInfo, RemoteService, UseCaseInfo, UseCaseInfos};
use tracing::{debug, warn};

use crate::device::{DeviceRef, RemoteDevice};
use crate::error::{HubError, Result};

/// Most recent discovery result, replaced wholesale on every update.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: Vec<RemoteService>,
}

impl ServiceCatalog {
    pub fn replace(&mut self, services: Vec<RemoteService>) {
        self.services = services;
    }

    pub fn find(&self, ski: &str) -> Option<&RemoteService> {
        self.services.iter().find(|service| service.ski == ski)
    }

    pub fn contains(&self, ski: &str) -> bool {
        self.find(ski).is_some()
    }

    pub fn services(&self) -> &[RemoteService] {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// What the hub knows about one remote identity.
#[derive(Debug, Clone, Default)]
pub struct SessionRecord {
    connected: bool,
    rejected: bool,
    device: Option<Weak<dyn RemoteDevice>>,
    capabilities: IndexSet<UseCase>,
    service: Option<RemoteService>,
    use_case_summary: Vec<UseCaseInfo>,
}

impl SessionRecord {
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    /// Device handle, if the protocol stack still holds the device.
    pub fn device(&self) -> Option<DeviceRef> {
        self.device.as_ref().and_then(Weak::upgrade)
    }

    pub fn has_observed_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn capabilities(&self) -> impl Iterator<Item = UseCase> + '_ {
        self.capabilities.iter().copied()
    }

    pub fn service(&self) -> Option<&RemoteService> {
        self.service.as_ref()
    }

    pub fn use_case_summary(&self) -> &[UseCaseInfo] {
        &self.use_case_summary
    }
}

/// Session records keyed by identity, in first-seen order.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: IndexMap<String, SessionRecord>,
}

impl SessionRegistry {
    /// Record a connectivity change. Returns the resulting connected flag,
    /// which stays `false` for identities whose trust was rejected. Only a
    /// connect creates a record.
    pub fn record_connection(&mut self, ski: &str, connected: bool) -> bool {
        if !connected {
            if let Some(record) = self.sessions.get_mut(ski) {
                record.connected = false;
                debug!(ski, connected, "session connectivity updated");
            }
            return false;
        }
        let record = self.sessions.entry(ski.to_owned()).or_default();
        if record.rejected {
            warn!(ski, "rejected remote reconnected; session stays closed");
            return false;
        }
        record.connected = true;
        debug!(ski, connected, "session connectivity updated");
        true
    }

    /// Note that `ski` exercised `use_case`, refreshing the device handle and
    /// the service descriptor on the way.
    pub fn observe_capability(
        &mut self,
        ski: &str,
        device: &DeviceRef,
        use_case: UseCase,
        catalog: &ServiceCatalog,
    ) -> Result<()> {
        let descriptor = catalog.find(ski).cloned();
        let known = self
            .sessions
            .get(ski)
            .is_some_and(|record| record.service.is_some());
        if descriptor.is_none() && !known {
            return Err(HubError::UnknownIdentity(ski.to_owned()));
        }

        let record = self.sessions.entry(ski.to_owned()).or_default();
        record.device = Some(Arc::downgrade(device));
        if descriptor.is_some() {
            record.service = descriptor;
        }
        if record.capabilities.insert(use_case) {
            debug!(ski, use_case = %use_case, "capability recorded");
        }
        Ok(())
    }

    /// Use-case summary of `ski`, taken from the live device when the stack
    /// still holds it and from the cached copy otherwise.
    pub fn project_use_cases(&self, ski: &str) -> Vec<UseCaseInfo> {
        let Some(record) = self.sessions.get(ski) else {
            return Vec::new();
        };
        match record.device() {
            Some(device) => summarise(device.as_ref()),
            None => record.use_case_summary.clone(),
        }
    }

    /// Refresh the cached summary from the live device, if any.
    pub fn refresh_use_cases(&mut self, ski: &str) {
        if let Some(record) = self.sessions.get_mut(ski) {
            if let Some(device) = record.device() {
                record.use_case_summary = summarise(device.as_ref());
            }
        }
    }

    /// Close the session of `ski` for good. Identities without a record are
    /// left unrecorded; returns whether a record was marked.
    pub fn mark_rejected(&mut self, ski: &str) -> bool {
        let Some(record) = self.sessions.get_mut(ski) else {
            return false;
        };
        record.rejected = true;
        record.connected = false;
        true
    }

    pub fn get(&self, ski: &str) -> Option<&SessionRecord> {
        self.sessions.get(ski)
    }

    pub fn is_known(&self, ski: &str) -> bool {
        self.sessions.contains_key(ski)
    }

    pub fn is_connected(&self, ski: &str) -> bool {
        self.sessions
            .get(ski)
            .is_some_and(SessionRecord::is_connected)
    }

    pub fn capabilities(&self, ski: &str) -> Vec<UseCase> {
        self.sessions
            .get(ski)
            .map(|record| record.capabilities().collect())
            .unwrap_or_default()
    }

    pub fn connected_count(&self) -> usize {
        self.sessions.values().filter(|r| r.connected).count()
    }

    /// Flattened entity list of every device the stack still holds.
    pub fn entity_infos(&self) -> Vec<EntityInfo> {
        let mut infos = Vec::new();
        for record in self.sessions.values() {
            let Some(device) = record.device() else {
                continue;
            };
            let device_type = device.device_type().unwrap_or_default();
            for entity in device.entities() {
                infos.push(EntityInfo {
                    address: entity.address(),
                    name: entity.entity_type(),
                    ski: device.ski(),
                    device_type: device_type.clone(),
                    features: entity.features(),
                });
            }
        }
        infos
    }

    /// Use-case summaries of every identity a device was observed for.
    pub fn use_case_infos(&self) -> UseCaseInfos {
        self.sessions
            .iter()
            .filter(|(_, record)| record.has_observed_device())
            .map(|(ski, _)| (ski.clone(), self.project_use_cases(ski)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SessionRecord)> {
        self.sessions.iter().map(|(ski, record)| (ski.as_str(), record))
    }
}

fn summarise(device: &dyn RemoteDevice) -> Vec<UseCaseInfo> {
    device
        .use_cases()
        .into_iter()
        .map(|support| UseCaseInfo {
            actor: support.actor,
            names: support.use_case_names,
        })
        .collect()
}
