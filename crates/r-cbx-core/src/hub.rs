//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Session/state synchronisation hub between device stack and UI."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::Mutex;
use r_cbx_common::{HubConfig, TrustDenialPolicy, UseCase};
use r_cbx_metrics::HubMetrics;
use r_cbx_msg::{MessageType, RemoteService, UiMessage};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::commands::CommandProcessor;
use crate::device::{DeviceEvent, DeviceService, PairingState, UseCaseClients};
use crate::error::{HubError, Result};
use crate::limits::LimitState;
use crate::router::{EventRouter, RouteOutcome};
use crate::sink::{Absorb, NotificationSink, UiClient};
use crate::state::HubState;

/// Hub behaviour taken from [`HubConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    pub auto_trust: bool,
    pub trust_denial: TrustDenialPolicy,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            auto_trust: true,
            trust_denial: TrustDenialPolicy::Terminate,
        }
    }
}

impl From<&HubConfig> for HubSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            auto_trust: config.auto_trust,
            trust_denial: config.trust_denial,
        }
    }
}

/// Owns session state, routes device events and executes UI commands.
///
/// Every entry point takes the state lock for its whole duration, so device
/// callbacks and UI commands never observe each other half-applied.
pub struct ControlHub {
    state: Mutex<HubState>,
    sink: NotificationSink,
    clients: UseCaseClients,
    service: Arc<dyn DeviceService>,
    settings: HubSettings,
    metrics: HubMetrics,
}

impl ControlHub {
    pub fn new(
        settings: HubSettings,
        clients: UseCaseClients,
        service: Arc<dyn DeviceService>,
        metrics: HubMetrics,
    ) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            sink: NotificationSink::new(metrics.clone()),
            clients,
            service,
            settings,
            metrics,
        }
    }

    pub fn remote_connected(&self, ski: &str) {
        let mut state = self.state.lock();
        if !state.registry.record_connection(ski, true) {
            return;
        }
        self.metrics
            .set_connected_sessions(state.registry.connected_count());
        info!(ski, "remote connected");

        if state.active_target.is_none() {
            state.active_target = Some(ski.to_owned());
            info!(ski, "adopted as active target");
        }
        if state.is_active_target(ski) {
            self.sink
                .send_text(MessageType::SelectService, ski)
                .absorb("select service");
        } else {
            self.sink
                .send_notification("", MessageType::ServiceListChanged, None)
                .absorb("service list changed");
        }
    }

    pub fn remote_disconnected(&self, ski: &str) {
        let mut state = self.state.lock();
        state.registry.record_connection(ski, false);
        self.metrics
            .set_connected_sessions(state.registry.connected_count());
        info!(ski, "remote disconnected");
        self.sink
            .send_notification("", MessageType::ServiceListChanged, None)
            .absorb("service list changed");
    }

    /// Replace the discovery catalog, trusting each entry first when
    /// auto-trust is on.
    pub fn visible_services_updated(&self, services: Vec<RemoteService>) {
        if self.settings.auto_trust {
            for service in &services {
                self.service.set_trusted(&service.ski, true);
            }
        }
        let mut state = self.state.lock();
        debug!(count = services.len(), "visible services updated");
        state.catalog.replace(services);
        self.sink
            .send_notification("", MessageType::ServiceListChanged, None)
            .absorb("service list changed");
    }

    /// React to a pairing change. A trust denial by the active target either
    /// shuts the service down and returns [`HubError::TrustDenied`], or marks
    /// the identity rejected, depending on the configured policy.
    pub fn pairing_state_changed(&self, ski: &str, pairing: PairingState) -> Result<()> {
        let mut state = self.state.lock();
        debug!(ski, state = %pairing, "pairing state changed");

        if pairing == PairingState::RemoteDeniedTrust && state.is_active_target(ski) {
            self.service.cancel_pairing(ski);
            self.service.unregister_remote(ski);
            match self.settings.trust_denial {
                TrustDenialPolicy::Terminate => {
                    error!(ski, "remote denied trust; shutting down");
                    self.service.shutdown();
                    return Err(HubError::TrustDenied(ski.to_owned()));
                }
                TrustDenialPolicy::Reject => {
                    warn!(ski, "remote denied trust; identity rejected");
                    if !state.registry.mark_rejected(ski) {
                        debug!(ski, "rejected identity never connected; no session to close");
                    }
                    state.active_target = None;
                    self.metrics
                        .set_connected_sessions(state.registry.connected_count());
                }
            }
        }

        self.sink
            .send_notification("", MessageType::ServiceListChanged, None)
            .absorb("service list changed");
        Ok(())
    }

    /// Whether to keep waiting for the user to confirm trust of `ski`.
    pub fn allow_waiting_for_trust(&self, ski: &str) -> bool {
        debug!(ski, "waiting for trust allowed");
        true
    }

    pub fn handle_device_event(&self, event: DeviceEvent) -> RouteOutcome {
        let mut state = self.state.lock();
        self.router().route(&mut state, &event)
    }

    /// Decode and execute one frame from the UI client. Malformed frames are
    /// logged and dropped without an acknowledgement.
    pub fn handle_ui_frame(&self, frame: &str) -> Result<()> {
        let command = match UiMessage::decode(frame) {
            Ok(command) => command,
            Err(err) => {
                warn!(error = %err, "malformed ui frame dropped");
                self.metrics.record_command(false);
                return Err(err.into());
            }
        };
        self.metrics.record_command(true);
        self.handle_ui_command(command);
        Ok(())
    }

    pub fn handle_ui_command(&self, command: UiMessage) {
        let mut state = self.state.lock();
        let router = self.router();
        CommandProcessor::new(
            &self.clients,
            self.service.as_ref(),
            &self.sink,
            &router,
            &self.metrics,
        )
        .dispatch(&mut state, command);
    }

    /// Attach a UI client and greet it with the service list and QR text.
    pub fn attach_ui(&self, client: Arc<dyn UiClient>) {
        let state = self.state.lock();
        if let Some(previous) = self.sink.attach(client) {
            debug!(client = %previous.id(), "previous ui client replaced");
        }
        self.sink
            .send_service_list(state.catalog.services().to_vec())
            .absorb("service list");
        self.sink
            .send_text(MessageType::QrCode, &self.service.qr_code_text())
            .absorb("qr code");
    }

    pub fn detach_ui(&self, id: Uuid) {
        self.sink.detach(id);
    }

    pub fn limits(&self) -> LimitState {
        self.state.lock().limits.clone()
    }

    pub fn active_target(&self) -> Option<String> {
        self.state.lock().active_target.clone()
    }

    pub fn is_connected(&self, ski: &str) -> bool {
        self.state.lock().registry.is_connected(ski)
    }

    pub fn is_known(&self, ski: &str) -> bool {
        self.state.lock().registry.is_known(ski)
    }

    pub fn capabilities(&self, ski: &str) -> Vec<UseCase> {
        self.state.lock().registry.capabilities(ski)
    }

    pub fn services(&self) -> Vec<RemoteService> {
        self.state.lock().catalog.services().to_vec()
    }

    /// Run `inspect` against a consistent view of the state.
    pub fn with_state<R>(&self, inspect: impl FnOnce(&HubState) -> R) -> R {
        inspect(&self.state.lock())
    }

    fn router(&self) -> EventRouter<'_> {
        EventRouter::new(&self.clients, &self.sink, &self.metrics)
    }
}
