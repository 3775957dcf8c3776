//! Metadata-fetch jobs.
//!
//! Metadata scripts are per-hazard-type and short-lived, so this kind
//! deliberately refuses the reset-skip optimization: correctness
//! matters more than saving a reload here, and every run starts from
//! the baseline namespace.

use std::path::PathBuf;

use serde_json::{Map, Value};
use squall_types::HazardEvent;

use crate::engine::{ScriptEngine, ScriptError};
use crate::scheduler::{ContextToken, ScriptJob};

use super::{
    ENVIRONMENT_GLOBAL, HAZARD_EVENT_GLOBAL, KIND_METADATA, METADATA_ENTRY_POINT, METADATA_KEY,
    MODIFIED_EVENT_KEY,
};

/// Fetch the metadata mapping for one hazard event.
///
/// Stages the event and an environment mapping, loads the per-type
/// metadata script, and invokes [`METADATA_ENTRY_POINT`]. The script
/// returns a pair: the serialized metadata string and an optionally
/// modified event.
#[derive(Debug, Clone)]
pub struct MetadataJob {
    script: PathBuf,
    event: HazardEvent,
    environment: Map<String, Value>,
}

impl MetadataJob {
    /// Fetch metadata for `event` using the given script file.
    pub fn new(script: impl Into<PathBuf>, event: HazardEvent) -> Self {
        Self {
            script: script.into(),
            event,
            environment: Map::new(),
        }
    }

    /// Stage an environment mapping alongside the event.
    pub fn with_environment(mut self, environment: Map<String, Value>) -> Self {
        self.environment = environment;
        self
    }
}

impl ScriptJob for MetadataJob {
    type Output = MetadataOutcome;

    fn context_token(&self) -> ContextToken {
        ContextToken::fresh(KIND_METADATA)
    }

    fn stage_and_run(&self, engine: &ScriptEngine) -> Result<MetadataOutcome, ScriptError> {
        engine.bind(HAZARD_EVENT_GLOBAL, &self.event)?;
        engine.bind(ENVIRONMENT_GLOBAL, &self.environment)?;
        engine.load_script(&self.script)?;

        let mut values = engine.invoke_multi(METADATA_ENTRY_POINT, &[])?;
        // Guard against short returns before draining the vec.
        while values.len() < 2 {
            values.push(Value::Null);
        }
        let raw_event = values.swap_remove(1);
        let raw_metadata = values.swap_remove(0);

        let metadata_json = match raw_metadata {
            Value::String(json) => json,
            other => {
                return Err(ScriptError::Decode {
                    entry_point: METADATA_ENTRY_POINT.to_string(),
                    message: format!("expected a metadata string, got {other}"),
                })
            }
        };
        let modified_event = match raw_event {
            Value::Null => None,
            other => Some(serde_json::from_value(other).map_err(|err| ScriptError::Decode {
                entry_point: METADATA_ENTRY_POINT.to_string(),
                message: err.to_string(),
            })?),
        };

        Ok(MetadataOutcome {
            metadata_json,
            modified_event,
        })
    }
}

/// The raw pair a metadata script returns.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataOutcome {
    /// The serialized metadata exactly as the script produced it.
    pub metadata_json: String,
    /// The event, if the script chose to modify it.
    pub modified_event: Option<HazardEvent>,
}

impl MetadataOutcome {
    /// Build the single combined mapping callers receive: the parsed
    /// metadata under [`METADATA_KEY`] and the optional modified event
    /// under the reserved [`MODIFIED_EVENT_KEY`] (null when absent).
    pub fn into_mapping(self) -> Result<Map<String, Value>, ScriptError> {
        let metadata: Value =
            serde_json::from_str(&self.metadata_json).map_err(|err| ScriptError::Decode {
                entry_point: METADATA_ENTRY_POINT.to_string(),
                message: format!("metadata payload is not valid JSON: {err}"),
            })?;

        let modified = match self.modified_event {
            Some(event) => serde_json::to_value(event).map_err(|err| ScriptError::Decode {
                entry_point: METADATA_ENTRY_POINT.to_string(),
                message: err.to_string(),
            })?,
            None => Value::Null,
        };

        let mut mapping = Map::new();
        mapping.insert(METADATA_KEY.to_string(), metadata);
        mapping.insert(MODIFIED_EVENT_KEY.to_string(), modified);
        Ok(mapping)
    }
}
