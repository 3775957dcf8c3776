//! Event-modifying jobs.
//!
//! The one kind that opts into the reset-skip optimization: two modify
//! jobs naming the same target function on the same hazard type rely on
//! the same already-loaded script definitions and produce deterministic
//! output from their explicit inputs alone, so skipping the reset saves
//! a reload+cleanup cycle on every repeat of an interactive action like
//! "apply defaults".

use std::path::PathBuf;

use squall_types::HazardEvent;

use crate::engine::{ScriptEngine, ScriptError};
use crate::scheduler::{ContextToken, ScriptJob};

use super::{FUNCTION_NAME_GLOBAL, HAZARD_EVENT_GLOBAL, KIND_MODIFY, MODIFY_ENTRY_POINT};

/// Apply a named modifier function to one hazard event.
///
/// Stages the event and the target function name, loads the script
/// file that defines the modifier (idempotent, cheap next to a reset),
/// and invokes the prelude's dispatch entry point, which looks the
/// function up by name and applies it. Returns the modified event, or
/// `None` when the script declined to change anything.
#[derive(Debug, Clone)]
pub struct ModifyJob {
    script: PathBuf,
    event: HazardEvent,
    function: String,
}

impl ModifyJob {
    /// Apply `function` (defined in `script`) to `event`.
    pub fn new(
        script: impl Into<PathBuf>,
        event: HazardEvent,
        function: impl Into<String>,
    ) -> Self {
        Self {
            script: script.into(),
            event,
            function: function.into(),
        }
    }
}

impl ScriptJob for ModifyJob {
    type Output = Option<HazardEvent>;

    fn context_token(&self) -> ContextToken {
        // Same target function on the same hazard type ⇒ same loaded
        // definitions; anything else forces a reset.
        ContextToken::scoped(
            KIND_MODIFY,
            format!("{}::{}", self.function, self.event.hazard_type),
        )
    }

    fn declared_globals(&self) -> Vec<String> {
        // The staged inputs stay bound after the run. An equal
        // successor rebinds both before invoking, so stale values can
        // never reach it.
        vec![
            HAZARD_EVENT_GLOBAL.to_string(),
            FUNCTION_NAME_GLOBAL.to_string(),
        ]
    }

    fn stage_and_run(&self, engine: &ScriptEngine) -> Result<Option<HazardEvent>, ScriptError> {
        engine.bind(HAZARD_EVENT_GLOBAL, &self.event)?;
        engine.bind(FUNCTION_NAME_GLOBAL, self.function.as_str())?;
        engine.load_script(&self.script)?;
        engine.invoke(MODIFY_ENTRY_POINT, &[])
    }
}
