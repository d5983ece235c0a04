//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Use-case tags a remote device may expose to the hub.
///
/// The string form is the short tag used on the UI wire and in configuration
/// files (`"LPC"`, `"LPP"`, `"MGCP"`, `"MPC"`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum UseCase {
    /// Limitation of power consumption.
    Lpc,
    /// Limitation of power production.
    Lpp,
    /// Monitoring of grid connection point.
    Mgcp,
    /// Monitoring of power consumption.
    Mpc,
}

impl UseCase {
    /// True for the two limit-control use cases (consumption and production side).
    pub fn is_limit_control(self) -> bool {
        matches!(self, UseCase::Lpc | UseCase::Lpp)
    }
}
