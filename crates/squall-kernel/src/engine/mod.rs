//! The script engine — one persistent, stateful Lua interpreter.
//!
//! An engine is expensive to build (it loads a standard library of
//! helper bindings before any job runs) and cheap to reuse, but its
//! global namespace leaks state between jobs unless explicitly cleaned.
//! `ScriptEngine` wraps the interpreter behind exactly the operations
//! the rest of the kernel needs:
//!
//! - [`ScriptEngine::bind`] — stage a value under a top-level name
//! - [`ScriptEngine::invoke`] / [`ScriptEngine::invoke_multi`] — call a
//!   named entry point and pull typed results back out
//! - [`ScriptEngine::load_script`] — execute a script file at top level
//! - [`ScriptEngine::enumerate_names`] — snapshot the bound names
//! - [`ScriptEngine::reset`] — restore the namespace to its baseline
//!
//! # Reset contract
//!
//! The baseline name set is captured once, right after construction.
//! `reset()` works by defining a sweep routine *inside* the interpreter
//! and letting it walk its own namespace: only the interpreter can
//! authoritatively enumerate what job code (or a job that failed
//! halfway) left behind. After a successful reset,
//! `enumerate_names() == baseline`.

mod factory;

pub use factory::{EngineConfig, EngineFactory, LuaEngineFactory};

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use mlua::{Function, HookTriggers, Lua, LuaSerdeExt, MultiValue, SerializeOptions, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

/// Embedded standard helper bindings, loaded before the baseline snapshot.
const PRELUDE: &str = include_str!("prelude.lua");

/// Private name the sweep routine is defined under during a reset.
/// Job code is not expected to collide with it.
const SWEEP_NAME: &str = "__squall_namespace_sweep";

/// How often (in interpreter instructions) the deadline hook fires.
const DEADLINE_CHECK_EVERY: u32 = 10_000;

/// Sentinel embedded in the hook error so the timeout can be told apart
/// from ordinary script failures.
const DEADLINE_SENTINEL: &str = "squall: invocation deadline exceeded";

/// Result type for engine operations.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// A failing invoke, load, or staging call.
///
/// Carries the interpreter's diagnostic message and, where the
/// diagnostic named one, a `chunk:line` source location.
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    /// The interpreter raised an error while running script code.
    #[error("script error: {message}")]
    Exec {
        message: String,
        location: Option<String>,
    },
    /// A script file could not be read or executed.
    #[error("script file {path}: {message}")]
    Load { path: PathBuf, message: String },
    /// The requested entry point is not bound to a callable.
    #[error("no callable entry point named `{0}`")]
    MissingEntry(String),
    /// A value could not be staged into the interpreter.
    #[error("could not stage `{name}`: {message}")]
    Bind { name: String, message: String },
    /// An entry point returned something the job could not decode.
    #[error("could not decode result from `{entry_point}`: {message}")]
    Decode {
        entry_point: String,
        message: String,
    },
    /// The invocation ran past the configured deadline.
    #[error("script invocation exceeded the {limit:?} deadline")]
    Timeout { limit: Duration },
}

impl ScriptError {
    /// Source location (`chunk:line`) if the diagnostic carried one.
    pub fn location(&self) -> Option<&str> {
        match self {
            ScriptError::Exec { location, .. } => location.as_deref(),
            _ => None,
        }
    }

    /// True if this error left the engine in an unknown state that
    /// warrants discarding it.
    pub fn poisons_engine(&self) -> bool {
        matches!(self, ScriptError::Timeout { .. })
    }

    fn exec(err: mlua::Error) -> Self {
        let message = err.to_string();
        let location = extract_location(&message);
        ScriptError::Exec { message, location }
    }
}

/// The engine could not be constructed or reset; the instance is
/// unusable and must be discarded and rebuilt by the factory.
#[derive(Debug, Clone, Error)]
#[error("engine unusable during {phase}: {message}")]
pub struct EngineFatal {
    phase: &'static str,
    message: String,
}

impl EngineFatal {
    pub(crate) fn new(phase: &'static str, err: impl fmt::Display) -> Self {
        Self {
            phase,
            message: err.to_string(),
        }
    }

    /// Which engine lifecycle phase failed (`construct`, `prelude`, `reset`).
    pub fn phase(&self) -> &'static str {
        self.phase
    }
}

/// One persistent Lua interpreter with a captured baseline namespace.
///
/// Not `Send`: an engine is built on its worker's thread and never
/// leaves it. Exclusive ownership is enforced by the type system.
pub struct ScriptEngine {
    lua: Lua,
    /// Names bound immediately after construction. Read-only afterwards;
    /// everything in it survives every reset.
    baseline: BTreeSet<String>,
    /// Names created by `load_script` since the last reset. These are
    /// definition residue — what contextually-equal jobs rely on — as
    /// opposed to leakage a job's invocation left behind.
    loaded: RefCell<BTreeSet<String>>,
    /// Per-invocation deadline, enforced via an instruction hook.
    deadline: Option<Duration>,
}

impl ScriptEngine {
    /// Build an engine: fresh interpreter, embedded prelude, configured
    /// extra prelude files, then the baseline snapshot.
    pub(crate) fn bootstrap(config: &EngineConfig) -> Result<Self, EngineFatal> {
        let lua = Lua::new_with(mlua::StdLib::ALL_SAFE, mlua::LuaOptions::default())
            .map_err(|err| EngineFatal::new("construct", err))?;

        lua.load(PRELUDE)
            .set_name("prelude")
            .exec()
            .map_err(|err| EngineFatal::new("prelude", err))?;

        for path in &config.prelude_paths {
            let source = std::fs::read_to_string(path)
                .map_err(|err| EngineFatal::new("prelude", format!("{}: {}", path.display(), err)))?;
            lua.load(&source)
                .set_name(path.display().to_string())
                .exec()
                .map_err(|err| EngineFatal::new("prelude", err))?;
        }

        let baseline = collect_names(&lua);
        debug!(baseline = baseline.len(), "script engine ready");

        Ok(Self {
            lua,
            baseline,
            loaded: RefCell::new(BTreeSet::new()),
            deadline: config.invoke_deadline,
        })
    }

    /// The factory-standard namespace footprint captured at construction.
    pub fn baseline(&self) -> &BTreeSet<String> {
        &self.baseline
    }

    /// Names created by `load_script` since the last reset.
    pub fn loaded_names(&self) -> BTreeSet<String> {
        self.loaded.borrow().clone()
    }

    /// Bind a top-level name to a value.
    ///
    /// The value crosses into the interpreter through serde, so anything
    /// `Serialize` works — domain objects, maps, plain strings.
    pub fn bind<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> ScriptResult<()> {
        let options = SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false);
        let staged = self
            .lua
            .to_value_with(value, options)
            .map_err(|err| ScriptError::Bind {
                name: name.to_string(),
                message: err.to_string(),
            })?;
        self.lua
            .globals()
            .set(name, staged)
            .map_err(|err| ScriptError::Bind {
                name: name.to_string(),
                message: err.to_string(),
            })
    }

    /// Invoke a named entry point and decode its first return value.
    ///
    /// A missing return value decodes from null, so `Option<T>` outputs
    /// map "script returned nothing" to `None`.
    pub fn invoke<R: DeserializeOwned>(
        &self,
        entry_point: &str,
        args: &[JsonValue],
    ) -> ScriptResult<R> {
        let mut values = self.invoke_multi(entry_point, args)?;
        let first = if values.is_empty() {
            JsonValue::Null
        } else {
            values.swap_remove(0)
        };
        serde_json::from_value(first).map_err(|err| ScriptError::Decode {
            entry_point: entry_point.to_string(),
            message: err.to_string(),
        })
    }

    /// Invoke a named entry point and return every value it returned.
    pub fn invoke_multi(
        &self,
        entry_point: &str,
        args: &[JsonValue],
    ) -> ScriptResult<Vec<JsonValue>> {
        let func = match self.lua.globals().get::<_, Option<Function>>(entry_point) {
            Ok(Some(func)) => func,
            _ => return Err(ScriptError::MissingEntry(entry_point.to_string())),
        };

        let mut staged = Vec::with_capacity(args.len());
        for arg in args {
            let options = SerializeOptions::new()
                .serialize_none_to_null(false)
                .serialize_unit_to_null(false);
            staged.push(self.lua.to_value_with(arg, options).map_err(|err| {
                ScriptError::Bind {
                    name: entry_point.to_string(),
                    message: err.to_string(),
                }
            })?);
        }

        self.arm_deadline();
        let outcome = func.call::<_, MultiValue>(MultiValue::from_vec(staged));
        self.disarm_deadline();

        let values = outcome.map_err(|err| self.classify(err))?;
        values
            .into_iter()
            .map(|value| {
                self.lua
                    .from_value::<JsonValue>(value)
                    .map_err(|err| ScriptError::Decode {
                        entry_point: entry_point.to_string(),
                        message: err.to_string(),
                    })
            })
            .collect()
    }

    /// Execute a script file in the top-level namespace.
    ///
    /// Loading is idempotent and cheap next to a reset, so file-driven
    /// job kinds call this every run. Names the file creates are
    /// attributed to it and excluded from the leakage check.
    #[tracing::instrument(level = "debug", skip(self), fields(path = %path.display()))]
    pub fn load_script(&self, path: &Path) -> ScriptResult<()> {
        let source = std::fs::read_to_string(path).map_err(|err| ScriptError::Load {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        let chunk_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let before = self.enumerate_names();
        self.lua
            .load(&source)
            .set_name(chunk_name)
            .exec()
            .map_err(ScriptError::exec)?;
        let after = self.enumerate_names();

        self.loaded
            .borrow_mut()
            .extend(after.difference(&before).cloned());
        Ok(())
    }

    /// Every string-keyed name currently bound at the top level.
    pub fn enumerate_names(&self) -> BTreeSet<String> {
        collect_names(&self.lua)
    }

    /// Restore the namespace to the baseline captured at construction.
    ///
    /// The sweep runs inside the interpreter: an ephemeral routine walks
    /// every bound name, unbinds each one missing from the baseline, and
    /// returns the accumulated list (its own name included). The engine
    /// then unbinds the routine reference and every accumulated name.
    /// This stays correct after a job failed partway through — the sweep
    /// inspects actual state, not an expected set.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn reset(&self) -> Result<(), EngineFatal> {
        let swept = self
            .run_sweep()
            .map_err(|err| EngineFatal::new("reset", err))?;
        self.loaded.borrow_mut().clear();
        debug!(swept = swept.len(), "namespace reset to baseline");
        Ok(())
    }

    fn run_sweep(&self) -> mlua::Result<Vec<String>> {
        let chunk = format!(
            r#"
function {name}(baseline)
    local removed = {{}}
    for key in pairs(_G) do
        if type(key) == "string" and key ~= "{name}" and baseline[key] == nil then
            _G[key] = nil
            removed[#removed + 1] = key
        end
    end
    removed[#removed + 1] = "{name}"
    return removed
end
"#,
            name = SWEEP_NAME
        );
        self.lua.load(&chunk).set_name("namespace-sweep").exec()?;

        let sweep: Function = self.lua.globals().get(SWEEP_NAME)?;
        let baseline = self.lua.create_table()?;
        for name in &self.baseline {
            baseline.set(name.as_str(), true)?;
        }
        let removed: Vec<String> = sweep.call(baseline)?;

        let globals = self.lua.globals();
        globals.set(SWEEP_NAME, Value::Nil)?;
        for name in &removed {
            globals.set(name.as_str(), Value::Nil)?;
        }
        Ok(removed)
    }

    fn arm_deadline(&self) {
        if let Some(limit) = self.deadline {
            let deadline = Instant::now() + limit;
            let triggers = HookTriggers {
                every_nth_instruction: Some(DEADLINE_CHECK_EVERY),
                ..HookTriggers::default()
            };
            self.lua.set_hook(
                triggers,
                move |_lua, _debug| {
                    if Instant::now() >= deadline {
                        Err(mlua::Error::RuntimeError(DEADLINE_SENTINEL.to_string()))
                    } else {
                        Ok(())
                    }
                },
            );
        }
    }

    fn disarm_deadline(&self) {
        if self.deadline.is_some() {
            self.lua.remove_hook();
        }
    }

    fn classify(&self, err: mlua::Error) -> ScriptError {
        if let Some(limit) = self.deadline {
            if error_chain_contains(&err, DEADLINE_SENTINEL) {
                return ScriptError::Timeout { limit };
            }
        }
        ScriptError::exec(err)
    }
}

impl fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("baseline", &self.baseline.len())
            .field("loaded", &self.loaded.borrow().len())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Search an error and its whole source chain for a marker string.
fn error_chain_contains(err: &mlua::Error, needle: &str) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(layer) = current {
        if layer.to_string().contains(needle) {
            return true;
        }
        current = layer.source();
    }
    false
}

/// Collect every string-keyed global name.
fn collect_names(lua: &Lua) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for pair in lua.globals().pairs::<Value, Value>() {
        if let Ok((Value::String(key), _)) = pair {
            if let Ok(key) = key.to_str() {
                names.insert(key.to_string());
            }
        }
    }
    names
}

/// Pull a `chunk:line` location out of a Lua diagnostic.
///
/// Handles both shapes Lua produces: `[string "chunk"]:12:` for
/// in-memory chunks and the bare `chunk:12:` file style.
fn extract_location(message: &str) -> Option<String> {
    for line in message.lines() {
        if let Some(start) = line.find("[string \"") {
            let rest = &line[start + 9..];
            if let Some(quote) = rest.find('"') {
                let chunk = &rest[..quote];
                if let Some(bracket) = rest[quote..].find("]:") {
                    let digits: String = rest[quote + bracket + 2..]
                        .chars()
                        .take_while(|c| c.is_ascii_digit())
                        .collect();
                    if !chunk.is_empty() && !digits.is_empty() {
                        return Some(format!("{chunk}:{digits}"));
                    }
                }
            }
        }
        // mlua prefixes its own category ("runtime error: ..."), so scan
        // the remaining `": "`-separated segments for a `chunk:line` tail.
        for segment in line.split(": ") {
            let mut parts = segment.rsplitn(2, ':');
            if let (Some(number), Some(chunk)) = (parts.next(), parts.next()) {
                if !chunk.is_empty()
                    && !chunk.contains(char::is_whitespace)
                    && number.parse::<u32>().is_ok()
                {
                    return Some(format!("{}:{}", chunk, number));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn engine() -> ScriptEngine {
        ScriptEngine::bootstrap(&EngineConfig::default()).expect("bootstrap engine")
    }

    fn script_file(source: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".lua")
            .tempfile()
            .expect("create script file");
        file.write_all(source.as_bytes()).expect("write script");
        file
    }

    #[test]
    fn baseline_contains_stdlib_and_prelude() {
        let engine = engine();
        assert!(engine.baseline().contains("print"));
        assert!(engine.baseline().contains("pairs"));
        assert!(engine.baseline().contains("applyModifier"));
        assert!(engine.baseline().contains("mergeAttributes"));
    }

    #[test]
    fn bind_makes_name_visible() {
        let engine = engine();
        engine.bind("answer", &42).expect("bind");
        let names = engine.enumerate_names();
        assert!(names.contains("answer"));
        assert!(!engine.baseline().contains("answer"));
    }

    #[test]
    fn invoke_reads_bound_globals() {
        let engine = engine();
        engine.bind("answer", &41).expect("bind");
        let file = script_file("function bump() return answer + 1 end");
        engine.load_script(file.path()).expect("load");
        let result: i64 = engine.invoke("bump", &[]).expect("invoke");
        assert_eq!(result, 42);
    }

    #[test]
    fn invoke_passes_arguments() {
        let engine = engine();
        let file = script_file("function add(a, b) return a + b end");
        engine.load_script(file.path()).expect("load");
        let result: i64 = engine.invoke("add", &[json!(2), json!(3)]).expect("invoke");
        assert_eq!(result, 5);
    }

    #[test]
    fn invoke_multi_returns_every_value() {
        let engine = engine();
        let file = script_file(r#"function pair() return "meta", nil end"#);
        engine.load_script(file.path()).expect("load");
        let values = engine.invoke_multi("pair", &[]).expect("invoke");
        assert_eq!(values, vec![json!("meta"), json!(null)]);
    }

    #[test]
    fn invoke_missing_entry_point() {
        let engine = engine();
        let err = engine.invoke::<i64>("nothingHere", &[]).unwrap_err();
        assert!(matches!(err, ScriptError::MissingEntry(name) if name == "nothingHere"));
    }

    #[test]
    fn invoke_surfaces_script_error_with_location() {
        let engine = engine();
        let file = script_file("function boom()\n    error(\"kaboom\")\nend");
        engine.load_script(file.path()).expect("load");
        let err = engine.invoke::<i64>("boom", &[]).unwrap_err();
        match err {
            ScriptError::Exec { message, location } => {
                assert!(message.contains("kaboom"));
                assert!(location.is_some(), "expected a chunk:line location");
            }
            other => panic!("expected Exec error, got {other:?}"),
        }
    }

    #[test]
    fn load_script_missing_file() {
        let engine = engine();
        let err = engine
            .load_script(Path::new("/nonexistent/never.lua"))
            .unwrap_err();
        assert!(matches!(err, ScriptError::Load { .. }));
    }

    #[test]
    fn load_script_attributes_new_names() {
        let engine = engine();
        let file = script_file("function fromFile() return 1 end\nfileConstant = 7");
        engine.load_script(file.path()).expect("load");
        let loaded = engine.loaded_names();
        assert!(loaded.contains("fromFile"));
        assert!(loaded.contains("fileConstant"));
    }

    #[test]
    fn reset_restores_baseline() {
        let engine = engine();
        engine.bind("leak", &"payload").expect("bind");
        let file = script_file("function helper() return 1 end");
        engine.load_script(file.path()).expect("load");
        assert_ne!(engine.enumerate_names(), *engine.baseline());

        engine.reset().expect("reset");
        assert_eq!(engine.enumerate_names(), *engine.baseline());
        assert!(engine.loaded_names().is_empty());
    }

    #[test]
    fn reset_is_idempotent() {
        let engine = engine();
        engine.bind("leak", &1).expect("bind");
        engine.reset().expect("first reset");
        engine.reset().expect("second reset");
        assert_eq!(engine.enumerate_names(), *engine.baseline());
    }

    #[test]
    fn reset_cleans_up_after_failed_invoke() {
        let engine = engine();
        let file = script_file(
            "function partial()\n    partialState = \"half-written\"\n    error(\"midway\")\nend",
        );
        engine.load_script(file.path()).expect("load");
        let err = engine.invoke::<i64>("partial", &[]).unwrap_err();
        assert!(matches!(err, ScriptError::Exec { .. }));
        // The failed job left a stray partial binding behind.
        assert!(engine.enumerate_names().contains("partialState"));
        engine.reset().expect("reset");
        assert_eq!(engine.enumerate_names(), *engine.baseline());
    }

    #[test]
    fn reset_fails_fatally_when_namespace_is_frozen() {
        let engine = engine();
        let file = script_file(
            "function freeze()\n    setmetatable(_G, { __newindex = function() error(\"frozen\") end })\n    return 1\nend",
        );
        engine.load_script(file.path()).expect("load");
        let _: i64 = engine.invoke("freeze", &[]).expect("freeze runs fine");

        let err = engine.reset().unwrap_err();
        assert_eq!(err.phase(), "reset");
    }

    #[test]
    fn deadline_interrupts_runaway_invoke() {
        let config = EngineConfig {
            invoke_deadline: Some(Duration::from_millis(50)),
            ..EngineConfig::default()
        };
        let engine = ScriptEngine::bootstrap(&config).expect("bootstrap");
        let file = script_file("function spin() while true do end end");
        engine.load_script(file.path()).expect("load");
        let err = engine.invoke::<i64>("spin", &[]).unwrap_err();
        assert!(matches!(err, ScriptError::Timeout { .. }));
        assert!(err.poisons_engine());
    }

    #[test]
    fn prelude_dispatch_applies_named_modifier() {
        let engine = engine();
        let file = script_file(
            r#"
function setStage(event)
    event.attributes = event.attributes or {}
    event.attributes.stage = "action"
    return event
end
"#,
        );
        engine.load_script(file.path()).expect("load");
        engine
            .bind("hazardEvent", &json!({"eventId": "E1", "type": "FL.W"}))
            .expect("bind event");
        engine.bind("functionName", "setStage").expect("bind name");
        let modified: JsonValue = engine.invoke("applyModifier", &[]).expect("dispatch");
        assert_eq!(modified["attributes"]["stage"], json!("action"));
    }

    #[test]
    fn prelude_dispatch_rejects_unknown_function() {
        let engine = engine();
        engine
            .bind("hazardEvent", &json!({"eventId": "E1", "type": "FL.W"}))
            .expect("bind event");
        engine.bind("functionName", "noSuchThing").expect("bind name");
        let err = engine.invoke::<JsonValue>("applyModifier", &[]).unwrap_err();
        assert!(err.to_string().contains("unknown modifier function"));
    }

    #[test]
    fn extract_location_finds_chunk_and_line() {
        assert_eq!(
            extract_location("runtime error: validate.lua:3: attempt to index a nil value"),
            Some("validate.lua:3".to_string())
        );
        assert_eq!(
            extract_location("runtime error: [string \"boom.lua\"]:2: kaboom"),
            Some("boom.lua:2".to_string())
        );
        assert_eq!(extract_location("something went wrong"), None);
    }
}
