//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Websocket endpoint for the control box UI."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Network surface of the control box towards its UI.

pub mod websocket;

pub use websocket::{ChannelClient, UiServerBuilder, UiServerHandle};
