//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Push channel towards the single UI client."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use r_cbx_common::UseCase;
use r_cbx_metrics::HubMetrics;
use r_cbx_msg::{MessageType, RemoteService, UiMessage, WireLimit};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{HubError, Result};
use crate::registry::SessionRegistry;

/// Transport of one attached UI client.
pub trait UiClient: Send + Sync {
    fn id(&self) -> Uuid;
    /// Write one complete text frame.
    fn write_frame(&self, frame: String) -> Result<()>;
}

/// Serialises pushes to the UI client. Every frame goes out whole under the
/// wire lock; the two snapshot pushes additionally hold the snapshot lock so a
/// snapshot is built and written as one step.
pub struct NotificationSink {
    client: RwLock<Option<Arc<dyn UiClient>>>,
    wire: Mutex<()>,
    snapshot: Mutex<()>,
    metrics: HubMetrics,
}

impl NotificationSink {
    pub fn new(metrics: HubMetrics) -> Self {
        Self {
            client: RwLock::new(None),
            wire: Mutex::new(()),
            snapshot: Mutex::new(()),
            metrics,
        }
    }

    /// Attach `client`, replacing any previous one.
    pub fn attach(&self, client: Arc<dyn UiClient>) -> Option<Arc<dyn UiClient>> {
        debug!(client = %client.id(), "ui client attached");
        self.client.write().replace(client)
    }

    /// Detach the client with `id`; a newer client stays attached.
    pub fn detach(&self, id: Uuid) -> bool {
        let mut slot = self.client.write();
        if slot.as_ref().is_some_and(|client| client.id() == id) {
            *slot = None;
            debug!(client = %id, "ui client detached");
            return true;
        }
        false
    }

    pub fn is_attached(&self) -> bool {
        self.client.read().is_some()
    }

    pub fn send_message(&self, message: &UiMessage) -> Result<()> {
        let Some(client) = self.client.read().clone() else {
            self.metrics.record_push(false);
            return Err(HubError::NoClientConnected);
        };
        let frame = message.encode()?;
        let result = {
            let _wire = self.wire.lock();
            client.write_frame(frame)
        };
        self.metrics.record_push(result.is_ok());
        trace!(kind = %message.kind, ski = %message.ski, delivered = result.is_ok(), "ui push");
        result
    }

    pub fn send_notification(
        &self,
        ski: &str,
        kind: MessageType,
        use_case: Option<UseCase>,
    ) -> Result<()> {
        self.send_message(&UiMessage::notification(ski, kind, use_case))
    }

    pub fn send_text(&self, kind: MessageType, text: &str) -> Result<()> {
        self.send_message(&UiMessage::text(kind, text))
    }

    pub fn send_value(&self, ski: &str, kind: MessageType, use_case: UseCase, value: f64) -> Result<()> {
        self.send_message(&UiMessage::value(ski, kind, use_case, value))
    }

    pub fn send_values(
        &self,
        ski: &str,
        kind: MessageType,
        use_case: UseCase,
        values: Vec<f64>,
    ) -> Result<()> {
        self.send_message(&UiMessage::values(ski, kind, use_case, values))
    }

    pub fn send_limit(
        &self,
        ski: &str,
        kind: MessageType,
        use_case: UseCase,
        limit: WireLimit,
    ) -> Result<()> {
        self.send_message(&UiMessage::limit(ski, kind, use_case, limit))
    }

    pub fn send_service_list(&self, services: Vec<RemoteService>) -> Result<()> {
        self.send_message(&UiMessage::service_list(
            MessageType::GetServiceList,
            services,
        ))
    }

    /// Snapshot of every entity the registry can still reach.
    pub fn send_entity_info(&self, registry: &SessionRegistry) -> Result<()> {
        let _snapshot = self.snapshot.lock();
        let infos = registry.entity_infos();
        self.send_message(&UiMessage::entity_infos(MessageType::GetEntityInfos, infos))
    }

    /// Snapshot of every identity's use-case summary.
    pub fn send_use_case_info(&self, registry: &SessionRegistry) -> Result<()> {
        let _snapshot = self.snapshot.lock();
        let infos = registry.use_case_infos();
        self.send_message(&UiMessage::use_case_infos(
            MessageType::GetUseCaseInfos,
            infos,
        ))
    }
}

/// Log-and-continue handling for push results.
pub(crate) trait Absorb {
    fn absorb(self, what: &'static str);
}

impl Absorb for Result<()> {
    fn absorb(self, what: &'static str) {
        match self {
            Ok(()) => {}
            Err(HubError::NoClientConnected) => {
                debug!(push = what, "no ui client attached; push dropped")
            }
            Err(err) => warn!(push = what, error = %err, "ui push failed"),
        }
    }
}
