//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Session/state synchronisation core."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_cbx_msg::MessagingError;
use thiserror::Error;

use crate::device::DeviceError;

pub type Result<T> = std::result::Result<T, HubError>;

/// Failures of the hub core. Apart from [`HubError::TrustDenied`] every variant
/// is absorbed and logged where it occurs.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("identity {0} has not been discovered")]
    UnknownIdentity(String),
    #[error("device value unavailable: {0}")]
    ReadUnavailable(#[source] DeviceError),
    #[error("device write to {ski} failed: {source}")]
    WriteFailed {
        ski: String,
        #[source]
        source: DeviceError,
    },
    #[error("no ui client connected")]
    NoClientConnected,
    #[error("ui client write failed: {0}")]
    ClientGone(String),
    #[error("remote {0} denied trust")]
    TrustDenied(String),
    #[error("malformed ui message: {0}")]
    Malformed(#[from] MessagingError),
}
