//! ---
//! ems_section: "08-simulation-testing"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "In-memory device stack and UI client for simulation and tests."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! In-memory stand-ins for the device protocol stack. Values are seeded by the
//! caller, writes are stored and echoed back as change events, and failures
//! can be injected per identity.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::TimeDelta;
use indexmap::IndexMap;
use parking_lot::Mutex;
use r_cbx_common::UseCase;
use r_cbx_msg::UiMessage;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::device::{
    DeviceError, DeviceEvent, DeviceResult, DeviceService, EntityRef, EventKind, LoadControl,
    Measurement, Monitoring, PendingWrite, RemoteDevice, RemoteEntity, UseCaseClients,
    UseCaseSupport, WriteOutcome,
};
use crate::error::{HubError, Result};
use crate::limits::LoadLimit;
use crate::sink::UiClient;

/// Protocol name a remote advertises for `use_case`.
pub fn protocol_name(use_case: UseCase) -> &'static str {
    match use_case {
        UseCase::Lpc => "limitationOfPowerConsumption",
        UseCase::Lpp => "limitationOfPowerProduction",
        UseCase::Mgcp => "monitoringOfGridConnectionPoint",
        UseCase::Mpc => "monitoringOfPowerConsumption",
    }
}

/// Actor role the remote takes for `use_case`.
pub fn remote_actor(use_case: UseCase) -> &'static str {
    match use_case {
        UseCase::Lpc | UseCase::Lpp => "ControllableSystem",
        UseCase::Mgcp => "GridConnectionPoint",
        UseCase::Mpc => "MonitoredUnit",
    }
}

fn features_for(use_case: UseCase) -> &'static [&'static str] {
    match use_case {
        UseCase::Lpc | UseCase::Lpp => &[
            "LoadControl, server",
            "DeviceConfiguration, server",
            "DeviceDiagnosis, server",
            "ElectricalConnection, server",
        ],
        UseCase::Mgcp | UseCase::Mpc => &["ElectricalConnection, server", "Measurement, server"],
    }
}

#[derive(Debug)]
pub struct SimEntity {
    ski: String,
    address: String,
    entity_type: String,
    features: Vec<String>,
}

impl SimEntity {
    pub fn new(ski: &str, index: usize, use_cases: &[UseCase]) -> Self {
        let mut features: Vec<String> = Vec::new();
        for use_case in use_cases {
            for feature in features_for(*use_case) {
                if !features.iter().any(|f| f.as_str() == *feature) {
                    features.push((*feature).to_owned());
                }
            }
        }
        Self {
            ski: ski.to_owned(),
            address: format!("[{}]", index + 1),
            entity_type: "ControllableSystem".to_owned(),
            features,
        }
    }
}

impl RemoteEntity for SimEntity {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn entity_type(&self) -> String {
        self.entity_type.clone()
    }

    fn features(&self) -> Vec<String> {
        self.features.clone()
    }

    fn device_ski(&self) -> String {
        self.ski.clone()
    }
}

#[derive(Debug)]
pub struct SimDevice {
    ski: String,
    device_type: String,
    entities: Vec<EntityRef>,
    use_cases: Vec<UseCase>,
}

impl SimDevice {
    pub fn new(ski: &str, device_type: &str, use_cases: &[UseCase], entities: usize) -> Self {
        Self {
            ski: ski.to_owned(),
            device_type: device_type.to_owned(),
            entities: (0..entities)
                .map(|index| Arc::new(SimEntity::new(ski, index, use_cases)) as EntityRef)
                .collect(),
            use_cases: use_cases.to_vec(),
        }
    }

    pub fn entity(&self, index: usize) -> Option<EntityRef> {
        self.entities.get(index).cloned()
    }

    pub fn supported(&self) -> &[UseCase] {
        &self.use_cases
    }
}

impl RemoteDevice for SimDevice {
    fn ski(&self) -> String {
        self.ski.clone()
    }

    fn device_type(&self) -> Option<String> {
        Some(self.device_type.clone())
    }

    fn entities(&self) -> Vec<EntityRef> {
        self.entities.clone()
    }

    fn use_cases(&self) -> Vec<UseCaseSupport> {
        let mut by_actor: IndexMap<&'static str, Vec<String>> = IndexMap::new();
        for use_case in &self.use_cases {
            by_actor
                .entry(remote_actor(*use_case))
                .or_default()
                .push(protocol_name(*use_case).to_owned());
        }
        by_actor
            .into_iter()
            .map(|(actor, use_case_names)| UseCaseSupport {
                actor: actor.to_owned(),
                use_case_names,
            })
            .collect()
    }
}

type EntityKey = (String, String);

fn key_of(entity: &dyn RemoteEntity) -> EntityKey {
    (entity.device_ski(), entity.address())
}

/// A write the simulated stack accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum WrittenValue {
    Limit(LoadLimit),
    FailsafeValue(f64),
    FailsafeDuration(TimeDelta),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub ski: String,
    pub address: String,
    pub value: WrittenValue,
}

#[derive(Debug, Clone, Default)]
struct LoadValues {
    limit: Option<LoadLimit>,
    failsafe_value: Option<f64>,
    failsafe_duration: Option<TimeDelta>,
    nominal_max: Option<f64>,
}

/// Simulated LPC or LPP client.
pub struct SimLoadControl {
    use_case: UseCase,
    entities: Mutex<Vec<EntityRef>>,
    values: Mutex<HashMap<EntityKey, LoadValues>>,
    writes: Mutex<Vec<WriteRecord>>,
    echoes: Mutex<Vec<(EntityRef, EventKind)>>,
    failing: Mutex<HashSet<String>>,
    reject_limits: AtomicBool,
    hold_confirmations: AtomicBool,
    pending: Mutex<Vec<oneshot::Sender<WriteOutcome>>>,
    counter: AtomicU64,
}

impl SimLoadControl {
    pub fn new(use_case: UseCase) -> Self {
        Self {
            use_case,
            entities: Mutex::new(Vec::new()),
            values: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            echoes: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            reject_limits: AtomicBool::new(false),
            hold_confirmations: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }

    pub fn register_entity(&self, entity: EntityRef) {
        let mut entities = self.entities.lock();
        let key = key_of(entity.as_ref());
        if !entities.iter().any(|e| key_of(e.as_ref()) == key) {
            entities.push(entity);
        }
    }

    pub fn unregister_device(&self, ski: &str) {
        self.entities.lock().retain(|e| e.device_ski() != ski);
    }

    pub fn set_limit(&self, entity: &dyn RemoteEntity, limit: LoadLimit) {
        self.values.lock().entry(key_of(entity)).or_default().limit = Some(limit);
    }

    pub fn set_failsafe_value(&self, entity: &dyn RemoteEntity, value: f64) {
        self.values.lock().entry(key_of(entity)).or_default().failsafe_value = Some(value);
    }

    pub fn set_failsafe_duration(&self, entity: &dyn RemoteEntity, duration: TimeDelta) {
        self.values.lock().entry(key_of(entity)).or_default().failsafe_duration = Some(duration);
    }

    pub fn set_nominal_max(&self, entity: &dyn RemoteEntity, value: f64) {
        self.values.lock().entry(key_of(entity)).or_default().nominal_max = Some(value);
    }

    /// Make every write to entities of `ski` fail with a transport error.
    pub fn fail_writes_to(&self, ski: &str) {
        self.failing.lock().insert(ski.to_owned());
    }

    /// Have the remote reject limit writes it receives from now on.
    pub fn reject_limits(&self, reject: bool) {
        self.reject_limits.store(reject, Ordering::SeqCst);
    }

    /// Keep limit confirmations back until [`Self::resolve_confirmations`].
    pub fn hold_confirmations(&self, hold: bool) {
        self.hold_confirmations.store(hold, Ordering::SeqCst);
    }

    /// Answer every held limit write. Returns how many verdicts reached a
    /// receiver that was still waiting.
    pub fn resolve_confirmations(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        pending
            .into_iter()
            .map(|tx| tx.send(self.limit_outcome()))
            .filter(|sent| sent.is_ok())
            .count()
    }

    fn limit_outcome(&self) -> WriteOutcome {
        if self.reject_limits.load(Ordering::SeqCst) {
            WriteOutcome::Rejected {
                code: 7,
                description: "limit not accepted".to_owned(),
            }
        } else {
            WriteOutcome::Accepted
        }
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    /// Change events owed for accepted writes, oldest first.
    pub fn take_echoes(&self) -> Vec<(EntityRef, EventKind)> {
        std::mem::take(&mut *self.echoes.lock())
    }

    fn read<T>(&self, entity: &dyn RemoteEntity, what: &str, pick: impl FnOnce(&LoadValues) -> Option<T>) -> DeviceResult<T> {
        self.values
            .lock()
            .get(&key_of(entity))
            .and_then(pick)
            .ok_or_else(|| {
                DeviceError::Unavailable(format!(
                    "{} {} of {}{}",
                    self.use_case,
                    what,
                    entity.device_ski(),
                    entity.address()
                ))
            })
    }

    fn accept(&self, entity: &dyn RemoteEntity, value: WrittenValue) -> DeviceResult<u64> {
        let (ski, address) = key_of(entity);
        if self.failing.lock().contains(&ski) {
            return Err(DeviceError::Transport(format!("{ski} unreachable")));
        }
        let echo = match &value {
            WrittenValue::Limit(_) => EventKind::LimitUpdated,
            WrittenValue::FailsafeValue(_) => EventKind::FailsafeValueUpdated,
            WrittenValue::FailsafeDuration(_) => EventKind::FailsafeDurationUpdated,
        };
        {
            let mut values = self.values.lock();
            let stored = values.entry((ski.clone(), address.clone())).or_default();
            match &value {
                WrittenValue::Limit(limit) => stored.limit = Some(*limit),
                WrittenValue::FailsafeValue(v) => stored.failsafe_value = Some(*v),
                WrittenValue::FailsafeDuration(d) => stored.failsafe_duration = Some(*d),
            }
        }
        let registered = self
            .entities
            .lock()
            .iter()
            .find(|e| e.device_ski() == ski && e.address() == address)
            .cloned();
        if let Some(registered) = registered {
            self.echoes.lock().push((registered, echo));
        }
        self.writes.lock().push(WriteRecord {
            ski,
            address,
            value,
        });
        Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl LoadControl for SimLoadControl {
    fn use_case(&self) -> UseCase {
        self.use_case
    }

    fn limit(&self, entity: &dyn RemoteEntity) -> DeviceResult<LoadLimit> {
        self.read(entity, "limit", |v| v.limit)
    }

    fn failsafe_value(&self, entity: &dyn RemoteEntity) -> DeviceResult<f64> {
        self.read(entity, "failsafe value", |v| v.failsafe_value)
    }

    fn failsafe_duration(&self, entity: &dyn RemoteEntity) -> DeviceResult<TimeDelta> {
        self.read(entity, "failsafe duration", |v| v.failsafe_duration)
    }

    fn nominal_max(&self, entity: &dyn RemoteEntity) -> DeviceResult<f64> {
        self.read(entity, "nominal max", |v| v.nominal_max)
    }

    fn write_limit(&self, entity: &dyn RemoteEntity, limit: LoadLimit) -> DeviceResult<PendingWrite> {
        let counter = self.accept(entity, WrittenValue::Limit(limit))?;
        let (tx, rx) = oneshot::channel();
        if self.hold_confirmations.load(Ordering::SeqCst) {
            self.pending.lock().push(tx);
        } else {
            let _ = tx.send(self.limit_outcome());
        }
        Ok(PendingWrite::confirmed(counter, rx))
    }

    fn write_failsafe_value(&self, entity: &dyn RemoteEntity, value: f64) -> DeviceResult<PendingWrite> {
        self.accept(entity, WrittenValue::FailsafeValue(value))
            .map(PendingWrite::unconfirmed)
    }

    fn write_failsafe_duration(
        &self,
        entity: &dyn RemoteEntity,
        duration: TimeDelta,
    ) -> DeviceResult<PendingWrite> {
        self.accept(entity, WrittenValue::FailsafeDuration(duration))
            .map(PendingWrite::unconfirmed)
    }

    fn remote_entities(&self) -> Vec<EntityRef> {
        self.entities.lock().clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Reading {
    Scalar(f64),
    PerPhase(Vec<f64>),
}

/// Simulated MGCP or MPC client.
pub struct SimMonitoring {
    use_case: UseCase,
    readings: Mutex<HashMap<(EntityKey, Measurement), Reading>>,
}

impl SimMonitoring {
    pub fn new(use_case: UseCase) -> Self {
        Self {
            use_case,
            readings: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_scalar(&self, entity: &dyn RemoteEntity, measurement: Measurement, value: f64) {
        self.readings
            .lock()
            .insert((key_of(entity), measurement), Reading::Scalar(value));
    }

    pub fn set_per_phase(&self, entity: &dyn RemoteEntity, measurement: Measurement, values: Vec<f64>) {
        self.readings
            .lock()
            .insert((key_of(entity), measurement), Reading::PerPhase(values));
    }

    fn reading(&self, entity: &dyn RemoteEntity, measurement: Measurement) -> Option<Reading> {
        self.readings
            .lock()
            .get(&(key_of(entity), measurement))
            .cloned()
    }

    fn unavailable(&self, entity: &dyn RemoteEntity, measurement: Measurement) -> DeviceError {
        DeviceError::Unavailable(format!(
            "{} {} of {}{}",
            self.use_case,
            measurement,
            entity.device_ski(),
            entity.address()
        ))
    }
}

impl Monitoring for SimMonitoring {
    fn use_case(&self) -> UseCase {
        self.use_case
    }

    fn scalar(&self, entity: &dyn RemoteEntity, measurement: Measurement) -> DeviceResult<f64> {
        match self.reading(entity, measurement) {
            Some(Reading::Scalar(value)) => Ok(value),
            _ => Err(self.unavailable(entity, measurement)),
        }
    }

    fn per_phase(&self, entity: &dyn RemoteEntity, measurement: Measurement) -> DeviceResult<Vec<f64>> {
        match self.reading(entity, measurement) {
            Some(Reading::PerPhase(values)) => Ok(values),
            _ => Err(self.unavailable(entity, measurement)),
        }
    }
}

/// Calls made against the simulated device service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Register(String),
    Unregister(String),
    CancelPairing(String),
    SetTrusted(String, bool),
    Shutdown,
}

pub struct SimService {
    qr_text: String,
    calls: Mutex<Vec<ServiceCall>>,
    shut_down: AtomicBool,
}

impl SimService {
    pub fn new(qr_text: impl Into<String>) -> Self {
        Self {
            qr_text: qr_text.into(),
            calls: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    /// Identities registered since the last call.
    pub fn take_registrations(&self) -> Vec<String> {
        let mut calls = self.calls.lock();
        let mut registered = Vec::new();
        calls.retain(|call| match call {
            ServiceCall::Register(ski) => {
                registered.push(ski.clone());
                false
            }
            _ => true,
        });
        registered
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl DeviceService for SimService {
    fn register_remote(&self, ski: &str) {
        self.calls.lock().push(ServiceCall::Register(ski.to_owned()));
    }

    fn unregister_remote(&self, ski: &str) {
        self.calls
            .lock()
            .push(ServiceCall::Unregister(ski.to_owned()));
    }

    fn cancel_pairing(&self, ski: &str) {
        self.calls
            .lock()
            .push(ServiceCall::CancelPairing(ski.to_owned()));
    }

    fn set_trusted(&self, ski: &str, trusted: bool) {
        self.calls
            .lock()
            .push(ServiceCall::SetTrusted(ski.to_owned(), trusted));
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.calls.lock().push(ServiceCall::Shutdown);
    }

    fn qr_code_text(&self) -> String {
        self.qr_text.clone()
    }
}

/// Complete simulated stack: four use-case clients, the service and the
/// devices they serve. Holds the only strong device handles.
pub struct SimStack {
    pub lpc: Arc<SimLoadControl>,
    pub lpp: Arc<SimLoadControl>,
    pub mgcp: Arc<SimMonitoring>,
    pub mpc: Arc<SimMonitoring>,
    pub service: Arc<SimService>,
    devices: Mutex<IndexMap<String, Arc<SimDevice>>>,
}

impl SimStack {
    pub fn new(qr_text: impl Into<String>) -> Self {
        Self {
            lpc: Arc::new(SimLoadControl::new(UseCase::Lpc)),
            lpp: Arc::new(SimLoadControl::new(UseCase::Lpp)),
            mgcp: Arc::new(SimMonitoring::new(UseCase::Mgcp)),
            mpc: Arc::new(SimMonitoring::new(UseCase::Mpc)),
            service: Arc::new(SimService::new(qr_text)),
            devices: Mutex::new(IndexMap::new()),
        }
    }

    pub fn clients(&self) -> UseCaseClients {
        UseCaseClients {
            lpc: self.lpc.clone(),
            lpp: self.lpp.clone(),
            mgcp: self.mgcp.clone(),
            mpc: self.mpc.clone(),
        }
    }

    pub fn device_service(&self) -> Arc<dyn DeviceService> {
        self.service.clone()
    }

    pub fn load_control(&self, use_case: UseCase) -> Option<&SimLoadControl> {
        match use_case {
            UseCase::Lpc => Some(self.lpc.as_ref()),
            UseCase::Lpp => Some(self.lpp.as_ref()),
            UseCase::Mgcp | UseCase::Mpc => None,
        }
    }

    pub fn monitoring(&self, use_case: UseCase) -> Option<&SimMonitoring> {
        match use_case {
            UseCase::Mgcp => Some(self.mgcp.as_ref()),
            UseCase::Mpc => Some(self.mpc.as_ref()),
            UseCase::Lpc | UseCase::Lpp => None,
        }
    }

    /// Create a device and register its entities with the load-control
    /// clients of the use cases it supports.
    pub fn add_device(
        &self,
        ski: &str,
        device_type: &str,
        use_cases: &[UseCase],
        entities: usize,
    ) -> Arc<SimDevice> {
        let device = Arc::new(SimDevice::new(ski, device_type, use_cases, entities));
        for use_case in use_cases {
            if let Some(client) = self.load_control(*use_case) {
                for entity in device.entities() {
                    client.register_entity(entity);
                }
            }
        }
        self.devices.lock().insert(ski.to_owned(), device.clone());
        device
    }

    /// Forget a device, dropping the stack's strong handle.
    pub fn remove_device(&self, ski: &str) -> Option<Arc<SimDevice>> {
        self.lpc.unregister_device(ski);
        self.lpp.unregister_device(ski);
        self.devices.lock().shift_remove(ski)
    }

    pub fn device(&self, ski: &str) -> Option<Arc<SimDevice>> {
        self.devices.lock().get(ski).cloned()
    }

    pub fn devices(&self) -> Vec<Arc<SimDevice>> {
        self.devices.lock().values().cloned().collect()
    }

    pub fn event(
        &self,
        ski: &str,
        entity: usize,
        use_case: UseCase,
        kind: EventKind,
    ) -> Option<DeviceEvent> {
        let device = self.device(ski)?;
        let entity = device.entity(entity)?;
        Some(DeviceEvent {
            ski: ski.to_owned(),
            device: device as Arc<dyn RemoteDevice>,
            entity,
            use_case,
            kind,
        })
    }

    /// Support announcements for every entity and use case of `ski`.
    pub fn support_events(&self, ski: &str) -> Vec<DeviceEvent> {
        let Some(device) = self.device(ski) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        for entity in device.entities() {
            for use_case in device.supported() {
                events.push(DeviceEvent {
                    ski: ski.to_owned(),
                    device: device.clone() as Arc<dyn RemoteDevice>,
                    entity: entity.clone(),
                    use_case: *use_case,
                    kind: EventKind::UseCaseSupportUpdate,
                });
            }
        }
        events
    }

    /// Change events for writes accepted since the last call.
    pub fn take_write_echoes(&self) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        for client in [&self.lpc, &self.lpp] {
            for (entity, kind) in client.take_echoes() {
                let ski = entity.device_ski();
                let Some(device) = self.device(&ski) else {
                    continue;
                };
                events.push(DeviceEvent {
                    ski,
                    device: device as Arc<dyn RemoteDevice>,
                    entity,
                    use_case: client.use_case,
                    kind,
                });
            }
        }
        events
    }
}

/// UI client that keeps every frame it is sent.
pub struct RecordingUiClient {
    id: Uuid,
    frames: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl Default for RecordingUiClient {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            frames: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }
}

impl RecordingUiClient {
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    /// Frames decoded back into messages. Frames that fail to decode are
    /// skipped.
    pub fn messages(&self) -> Vec<UiMessage> {
        self.frames
            .lock()
            .iter()
            .filter_map(|frame| UiMessage::decode(frame).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl UiClient for RecordingUiClient {
    fn id(&self) -> Uuid {
        self.id
    }

    fn write_frame(&self, frame: String) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HubError::ClientGone(format!("client {} closed", self.id)));
        }
        self.frames.lock().push(frame);
        Ok(())
    }
}
