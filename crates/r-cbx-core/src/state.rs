//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Mutable hub state guarded by the hub lock."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use crate::limits::LimitState;
use crate::registry::{ServiceCatalog, SessionRegistry};

/// Everything the hub mutates. Lives behind one lock in [`crate::ControlHub`].
#[derive(Debug, Default)]
pub struct HubState {
    pub registry: SessionRegistry,
    pub catalog: ServiceCatalog,
    pub limits: LimitState,
    pub active_target: Option<String>,
}

impl HubState {
    pub fn is_active_target(&self, ski: &str) -> bool {
        self.active_target.as_deref() == Some(ski)
    }
}
