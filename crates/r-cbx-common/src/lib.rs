//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Core shared primitives for the R-CBX control box workspace.
//! This crate exposes configuration loading, logging, and the
//! seconds/duration conversions used at the UI boundary.

pub mod config;
pub mod logging;
pub mod time;
pub mod usecase;

pub use config::{
    AppConfig, HubConfig, LoggingConfig, MetricsConfig, SimulatedDeviceConfig, SimulationConfig,
    TrustDenialPolicy, UiConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{duration_from_wire_secs, duration_from_wire_value, duration_to_wire_secs};
pub use usecase::UseCase;
