//! Validation jobs.
//!
//! Validation must not be influenced by state left over from an
//! unrelated prior job, so this kind makes the same conservative choice
//! as metadata-fetch: always contextually unequal, reset before every
//! run.

use std::path::PathBuf;

use squall_types::HazardEvent;

use crate::engine::{ScriptEngine, ScriptError};
use crate::scheduler::{ContextToken, ScriptJob};

use super::{HAZARD_EVENTS_GLOBAL, KIND_VALIDATE, VALIDATE_ENTRY_POINT};

/// Validate a batch of hazard events.
///
/// Stages the event list, loads the validation script, and invokes
/// [`VALIDATE_ENTRY_POINT`]. The script returns a diagnostic string;
/// `None` (or an empty string, normalized here) means every event is
/// valid.
#[derive(Debug, Clone)]
pub struct ValidateJob {
    script: PathBuf,
    events: Vec<HazardEvent>,
}

impl ValidateJob {
    /// Validate `events` using the given script file.
    pub fn new(script: impl Into<PathBuf>, events: Vec<HazardEvent>) -> Self {
        Self {
            script: script.into(),
            events,
        }
    }
}

impl ScriptJob for ValidateJob {
    type Output = Option<String>;

    fn context_token(&self) -> ContextToken {
        ContextToken::fresh(KIND_VALIDATE)
    }

    fn stage_and_run(&self, engine: &ScriptEngine) -> Result<Option<String>, ScriptError> {
        engine.bind(HAZARD_EVENTS_GLOBAL, &self.events)?;
        engine.load_script(&self.script)?;
        let diagnostic: Option<String> = engine.invoke(VALIDATE_ENTRY_POINT, &[])?;
        Ok(diagnostic.filter(|text| !text.is_empty()))
    }
}
