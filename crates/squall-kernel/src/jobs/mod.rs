//! Concrete job kinds.
//!
//! Three kinds cover the product workflows: fetching per-hazard-type
//! metadata, applying a named modifier to an event, and validating a
//! batch of events. Each is a plain [`crate::scheduler::ScriptJob`]
//! implementation — the kernel's generic machinery knows nothing about
//! them, and callers are free to define further kinds of their own.
//!
//! Binding and entry-point names are the contract between these jobs
//! and the script authors; they live here as constants so the two
//! sides cannot drift silently.

mod metadata;
mod modify;
mod validate;

pub use metadata::{MetadataJob, MetadataOutcome};
pub use modify::ModifyJob;
pub use validate::ValidateJob;

/// Global the staged hazard event is bound under.
pub const HAZARD_EVENT_GLOBAL: &str = "hazardEvent";
/// Global the staged event list is bound under (validation).
pub const HAZARD_EVENTS_GLOBAL: &str = "hazardEvents";
/// Global the environment mapping is bound under (metadata).
pub const ENVIRONMENT_GLOBAL: &str = "environment";
/// Global the target modifier function name is bound under.
pub const FUNCTION_NAME_GLOBAL: &str = "functionName";

/// Entry point metadata scripts must define.
pub const METADATA_ENTRY_POINT: &str = "getMetaData";
/// Prelude-provided dispatch entry point for event modifiers.
pub const MODIFY_ENTRY_POINT: &str = "applyModifier";
/// Entry point validation scripts must define.
pub const VALIDATE_ENTRY_POINT: &str = "validate";

/// Key the parsed metadata lands under in the combined mapping.
pub const METADATA_KEY: &str = "metadata";
/// Reserved key the optional modified event is attached under.
pub const MODIFIED_EVENT_KEY: &str = "modifiedHazardEvent";

/// Job kind names, used in context tokens and log output.
pub(crate) const KIND_METADATA: &str = "metadata-fetch";
pub(crate) const KIND_MODIFY: &str = "event-modify";
pub(crate) const KIND_VALIDATE: &str = "validate";
