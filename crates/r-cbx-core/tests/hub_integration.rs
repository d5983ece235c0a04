//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Session/state synchronisation core."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::TimeDelta;
use r_cbx_common::{TrustDenialPolicy, UseCase};
use r_cbx_core::sim::{RecordingUiClient, ServiceCall, SimStack, WrittenValue};
use r_cbx_core::{
    ControlHub, Effect, EventKind, HubError, HubSettings, LoadLimit, Measurement, PairingState,
    RouteOutcome, UiClient, ValueKind,
};
use r_cbx_metrics::HubMetrics;
use r_cbx_msg::{MessageType, RemoteService, UiMessage, WireLimit};

struct Fixture {
    hub: Arc<ControlHub>,
    stack: SimStack,
    ui: Arc<RecordingUiClient>,
}

fn fixture_with(settings: HubSettings) -> Fixture {
    let stack = SimStack::new("QR:control-box");
    let hub = Arc::new(ControlHub::new(
        settings,
        stack.clients(),
        stack.device_service(),
        HubMetrics::unregistered(),
    ));
    let ui = Arc::new(RecordingUiClient::default());
    hub.attach_ui(ui.clone());
    ui.clear();
    Fixture { hub, stack, ui }
}

fn fixture() -> Fixture {
    fixture_with(HubSettings::default())
}

fn discover(fixture: &Fixture, skis: &[&str]) {
    fixture.hub.visible_services_updated(
        skis.iter()
            .map(|ski| RemoteService::new(*ski, format!("Device {ski}")))
            .collect(),
    );
}

fn kinds(ui: &RecordingUiClient) -> Vec<MessageType> {
    ui.messages().into_iter().map(|m| m.kind).collect()
}

fn acks(ui: &RecordingUiClient) -> usize {
    kinds(ui)
        .into_iter()
        .filter(|kind| *kind == MessageType::Acknowledge)
        .count()
}

fn find(ui: &RecordingUiClient, kind: MessageType) -> Vec<UiMessage> {
    ui.messages().into_iter().filter(|m| m.kind == kind).collect()
}

fn command(kind: MessageType) -> UiMessage {
    UiMessage::new(kind)
}

#[test]
fn events_from_unconnected_identity_are_discarded() {
    let f = fixture();
    f.stack.add_device("ski-9", "HeatPump", &[UseCase::Lpc], 1);
    discover(&f, &["ski-9"]);
    f.ui.clear();

    let event = f
        .stack
        .event("ski-9", 0, UseCase::Lpc, EventKind::UseCaseSupportUpdate)
        .unwrap();
    assert_eq!(f.hub.handle_device_event(event), RouteOutcome::Discarded);
    assert!(f.ui.frames().is_empty());
    assert!(!f.hub.is_known("ski-9"));
    assert!(f.hub.capabilities("ski-9").is_empty());
}

#[test]
fn capability_discovery_records_and_resyncs_active_target() {
    let f = fixture();
    let device = f.stack.add_device("ski-1", "HeatPump", &[UseCase::Lpc], 1);
    let entity = device.entity(0).unwrap();
    f.stack.lpc.set_limit(
        entity.as_ref(),
        LoadLimit::new(true, 4200.0, TimeDelta::seconds(3600)),
    );
    f.stack.lpc.set_failsafe_value(entity.as_ref(), 1000.0);
    f.stack
        .lpc
        .set_failsafe_duration(entity.as_ref(), TimeDelta::seconds(7200));
    f.stack.lpc.set_nominal_max(entity.as_ref(), 11000.0);

    discover(&f, &["ski-1"]);
    f.hub.remote_connected("ski-1");
    assert_eq!(f.hub.active_target().as_deref(), Some("ski-1"));
    f.ui.clear();

    let event = f
        .stack
        .event("ski-1", 0, UseCase::Lpc, EventKind::UseCaseSupportUpdate)
        .unwrap();
    assert_eq!(
        f.hub.handle_device_event(event),
        RouteOutcome::Admitted(Effect::CapabilityDiscovered)
    );
    assert_eq!(f.hub.capabilities("ski-1"), vec![UseCase::Lpc]);

    let kinds = kinds(&f.ui);
    assert_eq!(kinds[0], MessageType::GetEntityInfos);
    assert_eq!(kinds[1], MessageType::GetUseCaseInfos);
    assert!(kinds.contains(&MessageType::GetConsumptionLimit));
    assert!(kinds.contains(&MessageType::GetConsumptionNominalMax));

    let limits = f.hub.limits();
    assert!(limits.consumption_limit.is_active);
    assert_eq!(limits.consumption_limit.value, 4200.0);
    assert_eq!(limits.consumption_failsafe.duration, TimeDelta::seconds(7200));
    assert_eq!(limits.consumption_nominal_max, 11000.0);

    let duration = find(&f.ui, MessageType::GetConsumptionFailsafeDuration);
    assert_eq!(duration[0].value, 7200.0);
    assert_eq!(duration[0].ski, "ski-1");
    assert_eq!(duration[0].use_case, "LPC");

    let infos = find(&f.ui, MessageType::GetUseCaseInfos);
    let summary = infos[0].use_case_infos.as_ref().unwrap();
    assert_eq!(summary["ski-1"][0].actor, "ControllableSystem");
}

#[test]
fn repeated_discovery_keeps_capability_set() {
    let f = fixture();
    f.stack.add_device("ski-1", "HeatPump", &[UseCase::Lpc, UseCase::Mgcp], 1);
    discover(&f, &["ski-1"]);
    f.hub.remote_connected("ski-1");
    for use_case in [UseCase::Lpc, UseCase::Lpc, UseCase::Mgcp, UseCase::Lpc] {
        let event = f
            .stack
            .event("ski-1", 0, use_case, EventKind::UseCaseSupportUpdate)
            .unwrap();
        f.hub.handle_device_event(event);
    }
    assert_eq!(f.hub.capabilities("ski-1"), vec![UseCase::Lpc, UseCase::Mgcp]);
}

#[test]
fn undiscovered_identity_does_not_gain_capabilities() {
    let f = fixture();
    f.stack.add_device("ski-x", "HeatPump", &[UseCase::Lpc], 1);
    f.hub.remote_connected("ski-x");

    let event = f
        .stack
        .event("ski-x", 0, UseCase::Lpc, EventKind::UseCaseSupportUpdate)
        .unwrap();
    assert_eq!(
        f.hub.handle_device_event(event),
        RouteOutcome::Admitted(Effect::CapabilityDiscovered)
    );
    assert!(f.hub.capabilities("ski-x").is_empty());
    assert!(f.hub.is_connected("ski-x"));
}

#[test]
fn value_from_non_target_is_pushed_but_not_stored() {
    let f = fixture();
    let first = f.stack.add_device("ski-1", "HeatPump", &[UseCase::Lpp], 1);
    let second = f.stack.add_device("ski-2", "Inverter", &[UseCase::Lpp], 1);
    f.stack.lpp.set_limit(
        second.entity(0).unwrap().as_ref(),
        LoadLimit::new(true, 3000.0, TimeDelta::seconds(60)),
    );
    f.stack.lpp.set_limit(
        first.entity(0).unwrap().as_ref(),
        LoadLimit::new(false, 500.0, TimeDelta::zero()),
    );
    discover(&f, &["ski-1", "ski-2"]);
    f.hub.remote_connected("ski-1");
    f.hub.remote_connected("ski-2");
    assert_eq!(f.hub.active_target().as_deref(), Some("ski-1"));
    f.ui.clear();

    let event = f
        .stack
        .event("ski-2", 0, UseCase::Lpp, EventKind::LimitUpdated)
        .unwrap();
    assert_eq!(
        f.hub.handle_device_event(event),
        RouteOutcome::Admitted(Effect::ValueChanged(ValueKind::Limit))
    );
    let pushed = find(&f.ui, MessageType::GetProductionLimit);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].ski, "ski-2");
    assert_eq!(pushed[0].limit, WireLimit::new(true, 3000.0, TimeDelta::seconds(60)));
    assert_eq!(f.hub.limits().production_limit, LoadLimit::default());

    let event = f
        .stack
        .event("ski-1", 0, UseCase::Lpp, EventKind::LimitUpdated)
        .unwrap();
    f.hub.handle_device_event(event);
    assert_eq!(f.hub.limits().production_limit.value, 500.0);
}

#[test]
fn unavailable_value_drops_event_quietly() {
    let f = fixture();
    f.stack.add_device("ski-1", "HeatPump", &[UseCase::Lpc], 1);
    discover(&f, &["ski-1"]);
    f.hub.remote_connected("ski-1");
    f.ui.clear();

    let event = f
        .stack
        .event("ski-1", 0, UseCase::Lpc, EventKind::FailsafeValueUpdated)
        .unwrap();
    f.hub.handle_device_event(event);
    assert!(find(&f.ui, MessageType::GetConsumptionFailsafeValue).is_empty());
    assert_eq!(f.hub.limits().consumption_failsafe.value, 0.0);
}

#[test]
fn monitoring_values_are_pushed_with_their_codes() {
    let f = fixture();
    let device = f.stack.add_device("ski-1", "Meter", &[UseCase::Mgcp, UseCase::Mpc], 1);
    let entity = device.entity(0).unwrap();
    f.stack
        .mgcp
        .set_scalar(entity.as_ref(), Measurement::PowerLimitationFactor, 0.7);
    f.stack.mpc.set_per_phase(
        entity.as_ref(),
        Measurement::VoltagePerPhase,
        vec![230.1, 229.8, 231.0],
    );
    f.stack
        .mpc
        .set_scalar(entity.as_ref(), Measurement::EnergyProduced, 12.5);
    discover(&f, &["ski-1"]);
    f.hub.remote_connected("ski-1");
    f.ui.clear();

    for (use_case, measurement) in [
        (UseCase::Mgcp, Measurement::PowerLimitationFactor),
        (UseCase::Mpc, Measurement::VoltagePerPhase),
        (UseCase::Mpc, Measurement::EnergyProduced),
    ] {
        let event = f
            .stack
            .event("ski-1", 0, use_case, EventKind::Measurement(measurement))
            .unwrap();
        f.hub.handle_device_event(event);
    }

    let factor = find(&f.ui, MessageType::GetPowerLimitationFactor);
    assert_eq!(factor[0].value, 0.7);
    assert_eq!(factor[0].use_case, "MGCP");
    let voltage = find(&f.ui, MessageType::GetVoltagePerPhase);
    assert_eq!(voltage[0].values.as_deref(), Some(&[230.1, 229.8, 231.0][..]));
    let produced = find(&f.ui, MessageType::GetEnergyFeedIn);
    assert_eq!(produced[0].value, 12.5);
    assert_eq!(produced[0].use_case, "MPC");
}

#[test]
fn set_limit_fans_out_and_survives_failing_entity() {
    let f = fixture();
    f.stack.add_device("ski-1", "HeatPump", &[UseCase::Lpc], 1);
    f.stack.add_device("ski-2", "Wallbox", &[UseCase::Lpc], 1);
    f.stack.lpc.fail_writes_to("ski-1");

    let mut set = command(MessageType::SetConsumptionLimit);
    set.limit = WireLimit {
        is_active: true,
        duration: 3600,
        value: 4200.0,
    };
    f.hub.handle_ui_command(set);

    let limit = f.hub.limits().consumption_limit;
    assert!(limit.is_active);
    assert_eq!(limit.value, 4200.0);
    assert_eq!(limit.duration, TimeDelta::seconds(3600));

    let writes = f.stack.lpc.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].ski, "ski-2");
    assert_eq!(writes[0].value, WrittenValue::Limit(limit));
    assert_eq!(acks(&f.ui), 1);
}

#[test]
fn failsafe_duration_round_trips_through_device() {
    let f = fixture();
    f.stack.add_device("ski-1", "HeatPump", &[UseCase::Lpc], 1);
    discover(&f, &["ski-1"]);
    f.hub.remote_connected("ski-1");
    f.ui.clear();

    let mut set = command(MessageType::SetConsumptionFailsafeDuration);
    set.value = 60.9;
    f.hub.handle_ui_command(set);
    assert_eq!(
        f.hub.limits().consumption_failsafe.duration,
        TimeDelta::seconds(60)
    );
    assert_eq!(
        f.stack.lpc.writes()[0].value,
        WrittenValue::FailsafeDuration(TimeDelta::seconds(60))
    );

    for event in f.stack.take_write_echoes() {
        f.hub.handle_device_event(event);
    }
    let pushed = find(&f.ui, MessageType::GetConsumptionFailsafeDuration);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].value, 60.0);
}

#[test]
fn failsafe_value_command_updates_state_and_devices() {
    let f = fixture();
    f.stack.add_device("ski-1", "Inverter", &[UseCase::Lpp], 2);

    let mut set = command(MessageType::SetProductionFailsafeValue);
    set.value = -2500.0;
    f.hub.handle_ui_command(set);

    assert_eq!(f.hub.limits().production_failsafe.value, -2500.0);
    assert_eq!(f.stack.lpp.writes().len(), 2);
    assert!(f.stack.lpc.writes().is_empty());
}

#[test]
fn every_decoded_command_is_acknowledged_once() {
    let f = fixture();
    for kind in [
        MessageType::GetServiceList,
        MessageType::GetEntityInfos,
        MessageType::GetUseCaseInfos,
        MessageType::StartConsumptionHeartbeat,
        MessageType::Text,
    ] {
        f.hub.handle_ui_command(command(kind));
    }
    assert_eq!(acks(&f.ui), 5);
}

#[test]
fn malformed_frames_are_not_acknowledged() {
    let f = fixture();
    for frame in [
        "not json",
        r#"{"SKI":"a"}"#,
        r#"{"Type":99}"#,
        r#"{"Type":9,"Value":"high"}"#,
    ] {
        assert!(matches!(
            f.hub.handle_ui_frame(frame),
            Err(HubError::Malformed(_))
        ));
    }
    assert!(f.ui.frames().is_empty());

    f.hub.handle_ui_frame(r#"{"Type":4}"#).unwrap();
    assert_eq!(kinds(&f.ui), vec![MessageType::GetServiceList, MessageType::Acknowledge]);
}

#[test]
fn select_unknown_service_registers_it() {
    let f = fixture();
    let mut select = command(MessageType::SelectService);
    select.text = "ski-7".to_owned();
    f.hub.handle_ui_command(select);

    assert_eq!(f.hub.active_target().as_deref(), Some("ski-7"));
    assert_eq!(
        f.stack.service.calls(),
        vec![ServiceCall::Register("ski-7".to_owned())]
    );
    assert_eq!(acks(&f.ui), 1);
}

#[test]
fn select_service_without_identity_is_ignored() {
    let f = fixture();
    f.hub.remote_connected("ski-1");
    f.ui.clear();
    f.hub.handle_ui_frame(r#"{"Type":5}"#).unwrap();

    assert_eq!(f.hub.active_target().as_deref(), Some("ski-1"));
    assert!(f.stack.service.calls().is_empty());
    assert!(!f.hub.is_known(""));
    assert_eq!(kinds(&f.ui), vec![MessageType::Acknowledge]);
}

#[test]
fn select_known_service_resyncs_its_values() {
    let f = fixture();
    let first = f.stack.add_device("ski-1", "HeatPump", &[UseCase::Lpc], 1);
    f.stack.add_device("ski-2", "HeatPump", &[UseCase::Lpc], 1);
    f.stack.lpc.set_failsafe_value(first.entity(0).unwrap().as_ref(), 800.0);
    discover(&f, &["ski-1", "ski-2"]);
    f.hub.remote_connected("ski-2");
    f.hub.remote_connected("ski-1");
    let event = f
        .stack
        .event("ski-1", 0, UseCase::Lpc, EventKind::UseCaseSupportUpdate)
        .unwrap();
    f.hub.handle_device_event(event);
    assert_eq!(f.hub.limits().consumption_failsafe.value, 0.0);
    f.ui.clear();

    let mut select = command(MessageType::SelectService);
    select.text = "ski-1".to_owned();
    f.hub.handle_ui_command(select);

    assert_eq!(f.hub.limits().consumption_failsafe.value, 800.0);
    assert_eq!(find(&f.ui, MessageType::GetConsumptionFailsafeValue).len(), 1);
    assert!(f.stack.service.calls().iter().all(|c| !matches!(c, ServiceCall::Register(_))));
}

#[test]
fn get_all_data_replays_qr_and_cached_limits() {
    let f = fixture();
    let mut set = command(MessageType::SetProductionLimit);
    set.limit = WireLimit {
        is_active: true,
        duration: 900,
        value: 6000.0,
    };
    f.hub.handle_ui_command(set);
    f.ui.clear();

    f.hub.handle_ui_command(command(MessageType::GetAllData));
    let qr = find(&f.ui, MessageType::QrCode);
    assert_eq!(qr[0].text, "QR:control-box");
    f.ui.clear();

    let mut all = command(MessageType::GetAllData);
    all.ski = "ski-1".to_owned();
    all.text = "LPP".to_owned();
    f.hub.handle_ui_command(all);
    assert_eq!(
        kinds(&f.ui),
        vec![
            MessageType::GetProductionLimit,
            MessageType::GetProductionFailsafeValue,
            MessageType::GetProductionFailsafeDuration,
            MessageType::Acknowledge,
        ]
    );
    let limit = find(&f.ui, MessageType::GetProductionLimit);
    assert_eq!(limit[0].limit.value, 6000.0);
    assert_eq!(limit[0].limit.duration, 900);
    assert_eq!(limit[0].ski, "ski-1");
}

#[test]
fn connect_and_disconnect_notify_the_ui() {
    let f = fixture();
    f.hub.remote_connected("ski-1");
    let select = find(&f.ui, MessageType::SelectService);
    assert_eq!(select[0].text, "ski-1");

    f.ui.clear();
    f.hub.remote_connected("ski-2");
    assert_eq!(kinds(&f.ui), vec![MessageType::ServiceListChanged]);
    assert_eq!(f.hub.active_target().as_deref(), Some("ski-1"));

    f.ui.clear();
    f.hub.remote_disconnected("ski-1");
    assert!(!f.hub.is_connected("ski-1"));
    assert!(f.hub.is_known("ski-1"));
    assert_eq!(kinds(&f.ui), vec![MessageType::ServiceListChanged]);
}

#[test]
fn disconnect_of_never_connected_identity_leaves_no_record() {
    let f = fixture();
    f.hub.remote_disconnected("ghost");
    assert!(!f.hub.is_known("ghost"));
    assert!(!f.hub.is_connected("ghost"));
    assert!(f.hub.capabilities("ghost").is_empty());
}

#[test]
fn capabilities_and_summary_survive_reconnect_cycles() {
    let f = fixture();
    f.stack.add_device("ski-1", "HeatPump", &[UseCase::Lpc], 1);
    discover(&f, &["ski-1"]);
    f.hub.remote_connected("ski-1");
    let event = f
        .stack
        .event("ski-1", 0, UseCase::Lpc, EventKind::UseCaseSupportUpdate)
        .unwrap();
    f.hub.handle_device_event(event);
    let summary = f
        .hub
        .with_state(|state| state.registry.project_use_cases("ski-1"));
    assert!(!summary.is_empty());

    for _ in 0..3 {
        f.hub.remote_disconnected("ski-1");
        assert_eq!(f.hub.capabilities("ski-1"), vec![UseCase::Lpc]);
        f.hub.remote_connected("ski-1");
        assert_eq!(f.hub.capabilities("ski-1"), vec![UseCase::Lpc]);
    }
    f.hub.remote_disconnected("ski-1");

    assert!(!f.hub.is_connected("ski-1"));
    assert_eq!(f.hub.capabilities("ski-1"), vec![UseCase::Lpc]);
    assert_eq!(
        f.hub
            .with_state(|state| state.registry.project_use_cases("ski-1")),
        summary
    );
}

#[test]
fn events_after_disconnect_are_discarded() {
    let f = fixture();
    f.stack.add_device("ski-1", "HeatPump", &[UseCase::Lpc], 1);
    discover(&f, &["ski-1"]);
    f.hub.remote_connected("ski-1");
    f.hub.remote_disconnected("ski-1");
    let event = f
        .stack
        .event("ski-1", 0, UseCase::Lpc, EventKind::UseCaseSupportUpdate)
        .unwrap();
    assert_eq!(f.hub.handle_device_event(event), RouteOutcome::Discarded);
    assert!(f.hub.capabilities("ski-1").is_empty());
}

#[test]
fn visible_services_are_trusted_and_listed() {
    let f = fixture();
    discover(&f, &["ski-1", "ski-2"]);
    assert_eq!(
        f.stack.service.calls(),
        vec![
            ServiceCall::SetTrusted("ski-1".to_owned(), true),
            ServiceCall::SetTrusted("ski-2".to_owned(), true),
        ]
    );
    assert_eq!(kinds(&f.ui), vec![MessageType::ServiceListChanged]);

    discover(&f, &["ski-3"]);
    let services = f.hub.services();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].ski, "ski-3");
}

#[test]
fn auto_trust_off_leaves_trust_to_the_user() {
    let f = fixture_with(HubSettings {
        auto_trust: false,
        ..HubSettings::default()
    });
    discover(&f, &["ski-1"]);
    assert!(f.stack.service.calls().is_empty());
    assert_eq!(f.hub.services().len(), 1);
}

#[test]
fn attaching_ui_sends_service_list_and_qr() {
    let f = fixture();
    discover(&f, &["ski-1"]);
    let late = Arc::new(RecordingUiClient::default());
    f.hub.attach_ui(late.clone());

    let messages = late.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].kind, MessageType::GetServiceList);
    assert_eq!(messages[0].service_list.as_ref().unwrap()[0].ski, "ski-1");
    assert_eq!(messages[1].kind, MessageType::QrCode);

    f.hub.detach_ui(late.id());
    f.hub.handle_ui_command(command(MessageType::GetServiceList));
    assert_eq!(late.messages().len(), 2);
}

#[test]
fn trust_denial_by_target_terminates() {
    let f = fixture();
    f.hub.remote_connected("ski-1");
    let err = f
        .hub
        .pairing_state_changed("ski-1", PairingState::RemoteDeniedTrust)
        .unwrap_err();
    assert!(matches!(err, HubError::TrustDenied(ski) if ski == "ski-1"));
    assert!(f.stack.service.is_shut_down());
    assert_eq!(
        f.stack.service.calls(),
        vec![
            ServiceCall::CancelPairing("ski-1".to_owned()),
            ServiceCall::Unregister("ski-1".to_owned()),
            ServiceCall::Shutdown,
        ]
    );
}

#[test]
fn trust_denial_by_other_identity_is_only_reported() {
    let f = fixture();
    f.hub.remote_connected("ski-1");
    f.ui.clear();
    f.hub
        .pairing_state_changed("ski-2", PairingState::RemoteDeniedTrust)
        .unwrap();
    assert!(!f.stack.service.is_shut_down());
    assert_eq!(kinds(&f.ui), vec![MessageType::ServiceListChanged]);
}

#[test]
fn reject_policy_closes_the_session_for_good() {
    let f = fixture_with(HubSettings {
        trust_denial: TrustDenialPolicy::Reject,
        ..HubSettings::default()
    });
    f.hub.remote_connected("ski-1");
    f.hub
        .pairing_state_changed("ski-1", PairingState::RemoteDeniedTrust)
        .unwrap();
    assert!(!f.stack.service.is_shut_down());
    assert!(!f.hub.is_connected("ski-1"));
    assert_eq!(f.hub.active_target(), None);

    f.hub.remote_connected("ski-1");
    assert!(!f.hub.is_connected("ski-1"));
    assert!(f
        .hub
        .with_state(|state| state.registry.get("ski-1").is_some_and(|r| r.is_rejected())));
}

#[test]
fn reject_policy_for_unconnected_target_creates_no_record() {
    let f = fixture_with(HubSettings {
        trust_denial: TrustDenialPolicy::Reject,
        ..HubSettings::default()
    });
    let mut select = command(MessageType::SelectService);
    select.text = "ski-5".to_owned();
    f.hub.handle_ui_command(select);
    f.hub
        .pairing_state_changed("ski-5", PairingState::RemoteDeniedTrust)
        .unwrap();

    assert_eq!(f.hub.active_target(), None);
    assert!(!f.hub.is_known("ski-5"));
    assert!(!f.stack.service.is_shut_down());
}

#[test]
fn summary_survives_device_release() {
    let f = fixture();
    f.stack.add_device("ski-1", "HeatPump", &[UseCase::Lpc], 1);
    f.stack.add_device("ski-2", "HeatPump", &[UseCase::Lpc], 1);
    discover(&f, &["ski-1", "ski-2"]);
    f.hub.remote_connected("ski-1");
    f.hub.remote_connected("ski-2");
    let event = f
        .stack
        .event("ski-1", 0, UseCase::Lpc, EventKind::UseCaseSupportUpdate)
        .unwrap();
    f.hub.handle_device_event(event);

    let event = f
        .stack
        .event("ski-2", 0, UseCase::Lpc, EventKind::UseCaseSupportUpdate)
        .unwrap();
    f.stack.remove_device("ski-1");
    f.ui.clear();
    f.hub.handle_device_event(event);

    let entities = find(&f.ui, MessageType::GetEntityInfos);
    let entities = entities[0].entity_infos.as_ref().unwrap();
    assert!(entities.iter().all(|info| info.ski == "ski-2"));

    let use_cases = find(&f.ui, MessageType::GetUseCaseInfos);
    let use_cases = use_cases[0].use_case_infos.as_ref().unwrap();
    assert_eq!(use_cases.len(), 2);
    assert_eq!(use_cases["ski-1"][0].names, vec!["limitationOfPowerConsumption"]);
}

#[test]
fn unconsumed_heartbeat_is_ignored_but_refreshes_snapshots() {
    let f = fixture();
    f.stack.add_device("ski-1", "HeatPump", &[UseCase::Lpc], 1);
    discover(&f, &["ski-1"]);
    f.hub.remote_connected("ski-1");
    f.ui.clear();
    let event = f
        .stack
        .event("ski-1", 0, UseCase::Lpc, EventKind::Heartbeat)
        .unwrap();
    assert_eq!(
        f.hub.handle_device_event(event),
        RouteOutcome::Admitted(Effect::Ignored)
    );
    assert_eq!(
        kinds(&f.ui),
        vec![MessageType::GetEntityInfos, MessageType::GetUseCaseInfos]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_limit_confirmation_is_only_logged() {
    let f = fixture();
    f.stack.add_device("ski-1", "HeatPump", &[UseCase::Lpc], 1);
    f.stack.lpc.reject_limits(true);
    f.stack.lpc.hold_confirmations(true);

    let mut set = command(MessageType::SetConsumptionLimit);
    set.limit = WireLimit {
        is_active: true,
        duration: 60,
        value: 100.0,
    };
    f.hub.handle_ui_command(set);
    let commanded = LoadLimit::new(true, 100.0, TimeDelta::seconds(60));
    assert_eq!(f.stack.lpc.writes().len(), 1);
    assert_eq!(f.hub.limits().consumption_limit, commanded);

    assert_eq!(f.stack.lpc.resolve_confirmations(), 1);
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    assert_eq!(f.hub.limits().consumption_limit, commanded);
    assert_eq!(kinds(&f.ui), vec![MessageType::Acknowledge]);
}

#[test]
fn limit_confirmation_without_runtime_is_not_awaited() {
    let f = fixture();
    f.stack.add_device("ski-1", "HeatPump", &[UseCase::Lpc], 1);
    f.stack.lpc.hold_confirmations(true);

    let mut set = command(MessageType::SetConsumptionLimit);
    set.limit = WireLimit {
        is_active: true,
        duration: 0,
        value: 2000.0,
    };
    f.hub.handle_ui_command(set);

    assert_eq!(f.stack.lpc.resolve_confirmations(), 0);
    assert_eq!(f.hub.limits().consumption_limit.value, 2000.0);
    assert_eq!(kinds(&f.ui), vec![MessageType::Acknowledge]);
}
