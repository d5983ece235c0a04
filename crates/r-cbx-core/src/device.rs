//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Interfaces of the device protocol stack consumed by the hub."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Everything the hub needs from the device-side protocol stack: the remote
//! device model, the per-use-case client facades, the service lifecycle and the
//! inbound event shape. The stack itself lives behind these traits; the
//! [`crate::sim`] module provides an in-memory implementation.

use std::fmt;
use std::sync::Arc;

use chrono::TimeDelta;
use r_cbx_common::UseCase;
use r_cbx_msg::MessageType;
use strum::{AsRefStr, Display};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::limits::LoadLimit;

/// Failures reported by the device stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("value not available: {0}")]
    Unavailable(String),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// One addressable entity of a remote device.
pub trait RemoteEntity: Send + Sync + fmt::Debug {
    /// Entity address rendered as text, e.g. `[1]`.
    fn address(&self) -> String;
    /// Entity type name.
    fn entity_type(&self) -> String;
    /// Features rendered as `"<feature>, <role>"`.
    fn features(&self) -> Vec<String>;
    /// Identity of the owning device.
    fn device_ski(&self) -> String;
}

/// A remote device as seen through the protocol stack.
pub trait RemoteDevice: Send + Sync + fmt::Debug {
    fn ski(&self) -> String;
    fn device_type(&self) -> Option<String>;
    fn entities(&self) -> Vec<EntityRef>;
    fn use_cases(&self) -> Vec<UseCaseSupport>;
}

pub type EntityRef = Arc<dyn RemoteEntity>;
pub type DeviceRef = Arc<dyn RemoteDevice>;

/// Use cases a remote actor claims to support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseCaseSupport {
    pub actor: String,
    pub use_case_names: Vec<String>,
}

/// Result the remote reports for a limit write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    Rejected { code: u32, description: String },
}

/// Handle for an accepted outbound write.
#[derive(Debug)]
pub struct PendingWrite {
    pub msg_counter: u64,
    /// Present when the stack reports the remote's verdict asynchronously.
    pub confirmation: Option<oneshot::Receiver<WriteOutcome>>,
}

impl PendingWrite {
    pub fn unconfirmed(msg_counter: u64) -> Self {
        Self {
            msg_counter,
            confirmation: None,
        }
    }

    pub fn confirmed(msg_counter: u64, confirmation: oneshot::Receiver<WriteOutcome>) -> Self {
        Self {
            msg_counter,
            confirmation: Some(confirmation),
        }
    }
}

/// Client side of the load-control use cases (LPC and LPP share one shape).
pub trait LoadControl: Send + Sync {
    fn use_case(&self) -> UseCase;
    fn limit(&self, entity: &dyn RemoteEntity) -> DeviceResult<LoadLimit>;
    fn failsafe_value(&self, entity: &dyn RemoteEntity) -> DeviceResult<f64>;
    fn failsafe_duration(&self, entity: &dyn RemoteEntity) -> DeviceResult<TimeDelta>;
    fn nominal_max(&self, entity: &dyn RemoteEntity) -> DeviceResult<f64>;
    fn write_limit(&self, entity: &dyn RemoteEntity, limit: LoadLimit) -> DeviceResult<PendingWrite>;
    fn write_failsafe_value(&self, entity: &dyn RemoteEntity, value: f64)
        -> DeviceResult<PendingWrite>;
    fn write_failsafe_duration(
        &self,
        entity: &dyn RemoteEntity,
        duration: TimeDelta,
    ) -> DeviceResult<PendingWrite>;
    /// Entities currently registered for this use case, across all devices.
    fn remote_entities(&self) -> Vec<EntityRef>;
}

/// Quantities reported by the monitoring use cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Measurement {
    PowerLimitationFactor,
    Power,
    PowerPerPhase,
    EnergyFeedIn,
    EnergyConsumed,
    EnergyProduced,
    CurrentPerPhase,
    VoltagePerPhase,
    Frequency,
}

impl Measurement {
    pub fn is_per_phase(self) -> bool {
        matches!(
            self,
            Measurement::PowerPerPhase | Measurement::CurrentPerPhase | Measurement::VoltagePerPhase
        )
    }

    /// Message type used to push this quantity. Produced energy shares the
    /// feed-in code, which is what the UI renders it under.
    pub fn message_type(self) -> MessageType {
        match self {
            Measurement::PowerLimitationFactor => MessageType::GetPowerLimitationFactor,
            Measurement::Power => MessageType::GetPower,
            Measurement::PowerPerPhase => MessageType::GetPowerPerPhase,
            Measurement::EnergyFeedIn | Measurement::EnergyProduced => MessageType::GetEnergyFeedIn,
            Measurement::EnergyConsumed => MessageType::GetEnergyConsumed,
            Measurement::CurrentPerPhase => MessageType::GetCurrentPerPhase,
            Measurement::VoltagePerPhase => MessageType::GetVoltagePerPhase,
            Measurement::Frequency => MessageType::GetFrequency,
        }
    }

    /// Quantities a monitoring use case reports; empty for the others.
    pub fn supported_by(use_case: UseCase) -> &'static [Measurement] {
        use Measurement::*;
        match use_case {
            UseCase::Mgcp => &[
                PowerLimitationFactor,
                Power,
                EnergyFeedIn,
                EnergyConsumed,
                CurrentPerPhase,
                VoltagePerPhase,
                Frequency,
            ],
            UseCase::Mpc => &[
                Power,
                PowerPerPhase,
                EnergyConsumed,
                EnergyProduced,
                CurrentPerPhase,
                VoltagePerPhase,
                Frequency,
            ],
            UseCase::Lpc | UseCase::Lpp => &[],
        }
    }
}

/// Client side of the monitoring use cases (MGCP and MPC).
pub trait Monitoring: Send + Sync {
    fn use_case(&self) -> UseCase;
    fn scalar(&self, entity: &dyn RemoteEntity, measurement: Measurement) -> DeviceResult<f64>;
    fn per_phase(&self, entity: &dyn RemoteEntity, measurement: Measurement)
        -> DeviceResult<Vec<f64>>;
}

/// The four use-case clients the hub talks to.
#[derive(Clone)]
pub struct UseCaseClients {
    pub lpc: Arc<dyn LoadControl>,
    pub lpp: Arc<dyn LoadControl>,
    pub mgcp: Arc<dyn Monitoring>,
    pub mpc: Arc<dyn Monitoring>,
}

impl UseCaseClients {
    pub fn load_control(&self, use_case: UseCase) -> Option<&dyn LoadControl> {
        match use_case {
            UseCase::Lpc => Some(self.lpc.as_ref()),
            UseCase::Lpp => Some(self.lpp.as_ref()),
            UseCase::Mgcp | UseCase::Mpc => None,
        }
    }

    pub fn monitoring(&self, use_case: UseCase) -> Option<&dyn Monitoring> {
        match use_case {
            UseCase::Mgcp => Some(self.mgcp.as_ref()),
            UseCase::Mpc => Some(self.mpc.as_ref()),
            UseCase::Lpc | UseCase::Lpp => None,
        }
    }
}

/// Lifecycle operations on the local device service.
pub trait DeviceService: Send + Sync {
    fn register_remote(&self, ski: &str);
    fn unregister_remote(&self, ski: &str);
    fn cancel_pairing(&self, ski: &str);
    fn set_trusted(&self, ski: &str, trusted: bool);
    fn shutdown(&self);
    /// Pairing QR text of the local service.
    fn qr_code_text(&self) -> String;
}

/// Pairing progress reported by the service layer.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum PairingState {
    Queued,
    InProgress,
    Trusted,
    Completed,
    RemoteDeniedTrust,
    Error(String),
}

/// Kind of an inbound device event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    UseCaseSupportUpdate,
    LimitUpdated,
    FailsafeValueUpdated,
    FailsafeDurationUpdated,
    Heartbeat,
    Measurement(Measurement),
    /// Anything the stack emits that the hub has no mapping for.
    Other(String),
}

/// An event raised by a use-case client about one entity of one device.
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    pub ski: String,
    pub device: DeviceRef,
    pub entity: EntityRef,
    pub use_case: UseCase,
    pub kind: EventKind,
}
