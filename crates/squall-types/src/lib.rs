//! squall-types: shared domain vocabulary for the squall coordinator.
//!
//! This crate holds the plain-data types that cross the boundary between
//! the script-execution kernel and its callers (session controllers,
//! dialogs, product generators). Nothing here knows about the scripting
//! runtime — events travel through it as opaque serde payloads.

pub mod hazard;

pub use hazard::HazardEvent;
