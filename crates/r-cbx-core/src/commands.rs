//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Execution of commands received from the UI client."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::str::FromStr;

use chrono::TimeDelta;
use r_cbx_common::{duration_from_wire_value, duration_to_wire_secs, UseCase};
use r_cbx_metrics::HubMetrics;
use r_cbx_msg::{MessageType, UiMessage};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::device::{
    DeviceResult, DeviceService, LoadControl, PendingWrite, RemoteEntity, UseCaseClients,
    WriteOutcome,
};
use crate::error::HubError;
use crate::limits::{Direction, LoadLimit};
use crate::router::EventRouter;
use crate::sink::{Absorb, NotificationSink};
use crate::state::HubState;

/// Executes decoded UI commands against hub state and the device stack.
pub struct CommandProcessor<'a> {
    clients: &'a UseCaseClients,
    service: &'a dyn DeviceService,
    sink: &'a NotificationSink,
    router: &'a EventRouter<'a>,
    metrics: &'a HubMetrics,
}

impl<'a> CommandProcessor<'a> {
    pub fn new(
        clients: &'a UseCaseClients,
        service: &'a dyn DeviceService,
        sink: &'a NotificationSink,
        router: &'a EventRouter<'a>,
        metrics: &'a HubMetrics,
    ) -> Self {
        Self {
            clients,
            service,
            sink,
            router,
            metrics,
        }
    }

    /// Execute `command`, then acknowledge it.
    pub fn dispatch(&self, state: &mut HubState, command: UiMessage) {
        debug!(kind = %command.kind, ski = %command.ski, "ui command");
        match command.kind {
            MessageType::GetServiceList => self
                .sink
                .send_service_list(state.catalog.services().to_vec())
                .absorb("service list"),
            MessageType::SelectService => self.select_service(state, &command.text),
            MessageType::GetEntityInfos => self
                .sink
                .send_entity_info(&state.registry)
                .absorb("entity infos"),
            MessageType::GetUseCaseInfos => self
                .sink
                .send_use_case_info(&state.registry)
                .absorb("use case infos"),
            MessageType::GetAllData => self.send_all_data(state, &command.ski, &command.text),
            MessageType::SetConsumptionLimit => {
                self.set_limit(state, Direction::Consumption, &command)
            }
            MessageType::SetProductionLimit => {
                self.set_limit(state, Direction::Production, &command)
            }
            MessageType::SetConsumptionFailsafeValue => {
                self.set_failsafe_value(state, Direction::Consumption, command.value)
            }
            MessageType::SetProductionFailsafeValue => {
                self.set_failsafe_value(state, Direction::Production, command.value)
            }
            MessageType::SetConsumptionFailsafeDuration => self.set_failsafe_duration(
                state,
                Direction::Consumption,
                duration_from_wire_value(command.value),
            ),
            MessageType::SetProductionFailsafeDuration => self.set_failsafe_duration(
                state,
                Direction::Production,
                duration_from_wire_value(command.value),
            ),
            other => debug!(kind = %other, "command has no effect"),
        }
        self.sink
            .send_notification("", MessageType::Acknowledge, None)
            .absorb("acknowledge");
    }

    fn select_service(&self, state: &mut HubState, ski: &str) {
        if ski.is_empty() {
            debug!("select service without identity ignored");
            return;
        }
        state.active_target = Some(ski.to_owned());
        info!(ski, "active target selected");

        match state.registry.get(ski).and_then(|record| record.device()) {
            Some(device) => {
                let capabilities = state.registry.capabilities(ski);
                for entity in device.entities() {
                    for use_case in &capabilities {
                        self.router.resync(state, ski, entity.as_ref(), *use_case);
                    }
                }
            }
            None if !state.registry.is_connected(ski) => {
                info!(ski, "selected remote not connected; registering");
                self.service.register_remote(ski);
            }
            None => debug!(ski, "selected remote connected but no device observed yet"),
        }
    }

    fn send_all_data(&self, state: &HubState, ski: &str, text: &str) {
        if text.is_empty() {
            self.sink
                .send_text(MessageType::QrCode, &self.service.qr_code_text())
                .absorb("qr code");
            return;
        }
        let Some(direction) = UseCase::from_str(text)
            .ok()
            .and_then(Direction::from_use_case)
        else {
            debug!(ski, use_case = text, "no cached data for use case");
            return;
        };
        let use_case = direction.use_case();
        let limit = state.limits.limit(direction);
        let failsafe = state.limits.failsafe(direction);
        self.sink
            .send_limit(ski, direction.limit_message(), use_case, limit.to_wire())
            .absorb("limit");
        self.sink
            .send_value(ski, direction.failsafe_value_message(), use_case, failsafe.value)
            .absorb("failsafe value");
        self.sink
            .send_value(
                ski,
                direction.failsafe_duration_message(),
                use_case,
                duration_to_wire_secs(failsafe.duration) as f64,
            )
            .absorb("failsafe duration");
    }

    fn set_limit(&self, state: &mut HubState, direction: Direction, command: &UiMessage) {
        let limit = LoadLimit::from_wire(&command.limit);
        state.limits.set_limit(direction, limit);
        self.fan_out(direction, "limit", |client, entity| {
            client.write_limit(entity, limit)
        });
    }

    fn set_failsafe_value(&self, state: &mut HubState, direction: Direction, value: f64) {
        state.limits.failsafe_mut(direction).value = value;
        self.fan_out(direction, "failsafe value", |client, entity| {
            client.write_failsafe_value(entity, value)
        });
    }

    fn set_failsafe_duration(&self, state: &mut HubState, direction: Direction, duration: TimeDelta) {
        state.limits.failsafe_mut(direction).duration = duration;
        self.fan_out(direction, "failsafe duration", |client, entity| {
            client.write_failsafe_duration(entity, duration)
        });
    }

    /// Issue `write` to every entity registered for `direction`'s use case.
    /// A failing entity is logged and skipped.
    fn fan_out<F>(&self, direction: Direction, what: &'static str, write: F)
    where
        F: Fn(&dyn LoadControl, &dyn RemoteEntity) -> DeviceResult<PendingWrite>,
    {
        let use_case = direction.use_case();
        let Some(client) = self.clients.load_control(use_case) else {
            return;
        };
        for entity in client.remote_entities() {
            let ski = entity.device_ski();
            match write(client, entity.as_ref()) {
                Ok(pending) => {
                    info!(
                        ski = %ski,
                        direction = direction.label(),
                        what,
                        msg_counter = pending.msg_counter,
                        "write sent"
                    );
                    self.metrics.record_write(use_case.as_ref(), true);
                    observe_confirmation(pending, ski, direction, what);
                }
                Err(source) => {
                    let err = HubError::WriteFailed {
                        ski: ski.clone(),
                        source,
                    };
                    warn!(
                        ski = %ski,
                        direction = direction.label(),
                        what,
                        error = %err,
                        "write failed"
                    );
                    self.metrics.record_write(use_case.as_ref(), false);
                }
            }
        }
    }
}

/// Log the remote's verdict on a write once it arrives. Never blocks the
/// caller; without a runtime the verdict goes unobserved.
fn observe_confirmation(pending: PendingWrite, ski: String, direction: Direction, what: &'static str) {
    let Some(confirmation) = pending.confirmation else {
        return;
    };
    let Ok(handle) = Handle::try_current() else {
        debug!(ski = %ski, what, "no runtime; write confirmation not observed");
        return;
    };
    let msg_counter = pending.msg_counter;
    handle.spawn(async move {
        match confirmation.await {
            Ok(WriteOutcome::Accepted) => info!(
                ski = %ski,
                direction = direction.label(),
                what,
                msg_counter,
                "write accepted"
            ),
            Ok(WriteOutcome::Rejected { code, description }) => warn!(
                ski = %ski,
                direction = direction.label(),
                what,
                msg_counter,
                code,
                description = %description,
                "write rejected by remote"
            ),
            Err(_) => debug!(ski = %ski, what, msg_counter, "write confirmation dropped"),
        }
    });
}
