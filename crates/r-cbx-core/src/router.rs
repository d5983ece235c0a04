//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Classification and routing of inbound device events."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::TimeDelta;
use r_cbx_common::{duration_to_wire_secs, UseCase};
use r_cbx_metrics::HubMetrics;
use tracing::{debug, info, trace, warn};

use crate::device::{
    DeviceError, DeviceEvent, EventKind, Measurement, RemoteEntity, UseCaseClients,
};
use crate::error::{HubError, Result};
use crate::limits::{Direction, LoadLimit};
use crate::sink::{Absorb, NotificationSink};
use crate::state::HubState;

/// Value carried by a value-change event or re-read during re-sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Limit,
    FailsafeValue,
    FailsafeDuration,
    NominalMax,
    Measurement(Measurement),
}

impl ValueKind {
    /// Values re-read when a capability is (re)discovered.
    pub fn resync_set(use_case: UseCase) -> Vec<ValueKind> {
        if use_case.is_limit_control() {
            vec![
                ValueKind::Limit,
                ValueKind::FailsafeValue,
                ValueKind::FailsafeDuration,
                ValueKind::NominalMax,
            ]
        } else {
            Measurement::supported_by(use_case)
                .iter()
                .copied()
                .map(ValueKind::Measurement)
                .collect()
        }
    }
}

/// What an admitted event does to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    CapabilityDiscovered,
    ValueChanged(ValueKind),
    Ignored,
}

impl Effect {
    fn label(&self) -> &'static str {
        match self {
            Effect::CapabilityDiscovered => "capability",
            Effect::ValueChanged(_) => "value",
            Effect::Ignored => "ignored",
        }
    }
}

/// Result of routing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The identity was not connected; nothing changed.
    Discarded,
    Admitted(Effect),
}

/// Map an event to its effect. Measurements a use case does not report and
/// unmapped event kinds are ignored.
pub fn classify(use_case: UseCase, kind: &EventKind) -> Effect {
    let limit_control = use_case.is_limit_control();
    match kind {
        EventKind::UseCaseSupportUpdate => Effect::CapabilityDiscovered,
        EventKind::LimitUpdated if limit_control => Effect::ValueChanged(ValueKind::Limit),
        EventKind::FailsafeValueUpdated if limit_control => {
            Effect::ValueChanged(ValueKind::FailsafeValue)
        }
        EventKind::FailsafeDurationUpdated if limit_control => {
            Effect::ValueChanged(ValueKind::FailsafeDuration)
        }
        EventKind::Measurement(measurement)
            if Measurement::supported_by(use_case).contains(measurement) =>
        {
            Effect::ValueChanged(ValueKind::Measurement(*measurement))
        }
        _ => Effect::Ignored,
    }
}

/// A value read back from a use-case client.
#[derive(Debug, Clone, PartialEq)]
enum Observed {
    Limit(Direction, LoadLimit),
    FailsafeValue(Direction, f64),
    FailsafeDuration(Direction, TimeDelta),
    NominalMax(Direction, f64),
    Scalar(Measurement, f64),
    PerPhase(Measurement, Vec<f64>),
}

/// Routes device events against hub state. Borrowed per call under the hub
/// lock.
pub struct EventRouter<'a> {
    clients: &'a UseCaseClients,
    sink: &'a NotificationSink,
    metrics: &'a HubMetrics,
}

impl<'a> EventRouter<'a> {
    pub fn new(
        clients: &'a UseCaseClients,
        sink: &'a NotificationSink,
        metrics: &'a HubMetrics,
    ) -> Self {
        Self {
            clients,
            sink,
            metrics,
        }
    }

    pub fn route(&self, state: &mut HubState, event: &DeviceEvent) -> RouteOutcome {
        let use_case = event.use_case.as_ref();
        if !state.registry.is_connected(&event.ski) {
            debug!(ski = %event.ski, use_case, "event from unconnected remote discarded");
            self.metrics.record_event(use_case, "discarded");
            return RouteOutcome::Discarded;
        }

        if let Err(err) = state.registry.observe_capability(
            &event.ski,
            &event.device,
            event.use_case,
            &state.catalog,
        ) {
            warn!(ski = %event.ski, use_case, error = %err, "capability not recorded");
        }
        state.registry.refresh_use_cases(&event.ski);
        self.sink
            .send_entity_info(&state.registry)
            .absorb("entity infos");
        self.sink
            .send_use_case_info(&state.registry)
            .absorb("use case infos");

        let effect = classify(event.use_case, &event.kind);
        match effect {
            Effect::CapabilityDiscovered => {
                self.resync(state, &event.ski, event.entity.as_ref(), event.use_case)
            }
            Effect::ValueChanged(kind) => {
                match self.read(event.use_case, event.entity.as_ref(), kind) {
                    Ok(observed) => self.commit(state, &event.ski, event.use_case, observed),
                    Err(err) => {
                        warn!(ski = %event.ski, use_case, error = %err, "value unavailable; event dropped")
                    }
                }
            }
            Effect::Ignored => trace!(ski = %event.ski, use_case, kind = ?event.kind, "event ignored"),
        }
        self.metrics.record_event(use_case, effect.label());
        RouteOutcome::Admitted(effect)
    }

    /// Re-read every value `use_case` exposes on `entity` and push what is
    /// available. Does nothing unless `ski` has the capability recorded.
    pub fn resync(
        &self,
        state: &mut HubState,
        ski: &str,
        entity: &dyn RemoteEntity,
        use_case: UseCase,
    ) {
        if !state.registry.capabilities(ski).contains(&use_case) {
            trace!(ski, use_case = %use_case, "capability not recorded; resync skipped");
            return;
        }
        for kind in ValueKind::resync_set(use_case) {
            match self.read(use_case, entity, kind) {
                Ok(observed) => self.commit(state, ski, use_case, observed),
                Err(err) => trace!(ski, use_case = %use_case, ?kind, error = %err, "resync value skipped"),
            }
        }
    }

    fn read(
        &self,
        use_case: UseCase,
        entity: &dyn RemoteEntity,
        kind: ValueKind,
    ) -> Result<Observed> {
        self.pull(use_case, entity, kind)
            .map_err(HubError::ReadUnavailable)
    }

    fn pull(
        &self,
        use_case: UseCase,
        entity: &dyn RemoteEntity,
        kind: ValueKind,
    ) -> std::result::Result<Observed, DeviceError> {
        let unsupported = || DeviceError::Unavailable(format!("{kind:?} not reported by {use_case}"));
        if let ValueKind::Measurement(measurement) = kind {
            let client = self.clients.monitoring(use_case).ok_or_else(unsupported)?;
            return if measurement.is_per_phase() {
                client
                    .per_phase(entity, measurement)
                    .map(|values| Observed::PerPhase(measurement, values))
            } else {
                client
                    .scalar(entity, measurement)
                    .map(|value| Observed::Scalar(measurement, value))
            };
        }

        let direction = Direction::from_use_case(use_case).ok_or_else(unsupported)?;
        let client = self.clients.load_control(use_case).ok_or_else(unsupported)?;
        match kind {
            ValueKind::Limit => client
                .limit(entity)
                .map(|limit| Observed::Limit(direction, limit)),
            ValueKind::FailsafeValue => client
                .failsafe_value(entity)
                .map(|value| Observed::FailsafeValue(direction, value)),
            ValueKind::FailsafeDuration => client
                .failsafe_duration(entity)
                .map(|duration| Observed::FailsafeDuration(direction, duration)),
            ValueKind::NominalMax => client
                .nominal_max(entity)
                .map(|value| Observed::NominalMax(direction, value)),
            ValueKind::Measurement(_) => Err(unsupported()),
        }
    }

    /// Store `observed` when `ski` is the active target and push it regardless.
    fn commit(&self, state: &mut HubState, ski: &str, use_case: UseCase, observed: Observed) {
        let owns_target = state.is_active_target(ski);
        let limits = &mut state.limits;
        let pushed = match observed {
            Observed::Limit(direction, limit) => {
                if owns_target {
                    limits.set_limit(direction, limit);
                    info!(
                        ski,
                        direction = direction.label(),
                        active = limit.is_active,
                        value = limit.value,
                        duration_secs = duration_to_wire_secs(limit.duration),
                        "limit updated"
                    );
                }
                self.sink
                    .send_limit(ski, direction.limit_message(), use_case, limit.to_wire())
            }
            Observed::FailsafeValue(direction, value) => {
                if owns_target {
                    limits.failsafe_mut(direction).value = value;
                    info!(ski, direction = direction.label(), value, "failsafe value updated");
                }
                self.sink
                    .send_value(ski, direction.failsafe_value_message(), use_case, value)
            }
            Observed::FailsafeDuration(direction, duration) => {
                let secs = duration_to_wire_secs(duration);
                if owns_target {
                    limits.failsafe_mut(direction).duration = duration;
                    info!(ski, direction = direction.label(), secs, "failsafe duration updated");
                }
                self.sink.send_value(
                    ski,
                    direction.failsafe_duration_message(),
                    use_case,
                    secs as f64,
                )
            }
            Observed::NominalMax(direction, value) => {
                if owns_target {
                    limits.set_nominal_max(direction, value);
                }
                self.sink
                    .send_value(ski, direction.nominal_max_message(), use_case, value)
            }
            Observed::Scalar(measurement, value) => {
                self.sink
                    .send_value(ski, measurement.message_type(), use_case, value)
            }
            Observed::PerPhase(measurement, values) => {
                self.sink
                    .send_values(ski, measurement.message_type(), use_case, values)
            }
        };
        pushed.absorb("device value");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_update_is_discovery_for_every_use_case() {
        for use_case in [UseCase::Lpc, UseCase::Lpp, UseCase::Mgcp, UseCase::Mpc] {
            assert_eq!(
                classify(use_case, &EventKind::UseCaseSupportUpdate),
                Effect::CapabilityDiscovered
            );
        }
    }

    #[test]
    fn limit_events_only_count_for_limit_use_cases() {
        assert_eq!(
            classify(UseCase::Lpp, &EventKind::FailsafeDurationUpdated),
            Effect::ValueChanged(ValueKind::FailsafeDuration)
        );
        assert_eq!(classify(UseCase::Mgcp, &EventKind::LimitUpdated), Effect::Ignored);
    }

    #[test]
    fn measurements_follow_use_case_tables() {
        assert_eq!(
            classify(
                UseCase::Mgcp,
                &EventKind::Measurement(Measurement::PowerLimitationFactor)
            ),
            Effect::ValueChanged(ValueKind::Measurement(Measurement::PowerLimitationFactor))
        );
        assert_eq!(
            classify(
                UseCase::Mpc,
                &EventKind::Measurement(Measurement::PowerLimitationFactor)
            ),
            Effect::Ignored
        );
        assert_eq!(
            classify(UseCase::Lpc, &EventKind::Measurement(Measurement::Power)),
            Effect::Ignored
        );
    }

    #[test]
    fn heartbeat_and_unknown_events_are_ignored() {
        assert_eq!(classify(UseCase::Lpc, &EventKind::Heartbeat), Effect::Ignored);
        assert_eq!(
            classify(UseCase::Mpc, &EventKind::Other("DataUpdateSomething".into())),
            Effect::Ignored
        );
    }

    #[test]
    fn resync_sets_match_use_case() {
        assert_eq!(ValueKind::resync_set(UseCase::Lpc).len(), 4);
        assert!(ValueKind::resync_set(UseCase::Mpc)
            .contains(&ValueKind::Measurement(Measurement::EnergyProduced)));
    }
}
