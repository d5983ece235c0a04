//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Session/state synchronisation core."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Control box hub: keeps the session view of remote devices, routes their
//! events to the UI client and fans UI commands out to the devices.

pub mod commands;
pub mod device;
pub mod error;
pub mod hub;
pub mod limits;
pub mod registry;
pub mod router;
#[cfg(any(test, feature = "simulation"))]
pub mod sim;
pub mod sink;
pub mod state;

pub use device::{
    DeviceError, DeviceEvent, DeviceRef, DeviceService, EntityRef, EventKind, LoadControl,
    Measurement, Monitoring, PairingState, PendingWrite, RemoteDevice, RemoteEntity,
    UseCaseClients, UseCaseSupport, WriteOutcome,
};
pub use error::{HubError, Result};
pub use hub::{ControlHub, HubSettings};
pub use limits::{Direction, FailsafeLimit, LimitState, LoadLimit};
pub use registry::{ServiceCatalog, SessionRecord, SessionRegistry};
pub use router::{classify, Effect, RouteOutcome, ValueKind};
pub use sink::{NotificationSink, UiClient};
pub use state::HubState;
