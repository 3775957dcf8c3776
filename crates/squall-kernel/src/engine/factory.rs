//! Engine construction — configuration and the factory seam.
//!
//! Workers never build engines directly: they ask a factory, once at
//! pool start-up and again whenever an engine becomes unusable (a
//! failed reset or a timed-out invocation). The factory trait is the
//! seam tests use to substitute engine construction.

use std::path::PathBuf;
use std::time::Duration;

use super::{EngineFatal, ScriptEngine};

/// Configuration for engine construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Extra prelude scripts executed after the embedded helper
    /// bindings, before the baseline snapshot. Everything they define
    /// becomes part of the baseline and survives resets.
    pub prelude_paths: Vec<PathBuf>,

    /// Deadline applied to each `invoke`. `None` disables the
    /// instruction hook entirely. A deadline expiry poisons the engine,
    /// so the owning worker discards and rebuilds it.
    pub invoke_deadline: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prelude_paths: Vec::new(),
            invoke_deadline: Some(Duration::from_secs(30)),
        }
    }
}

impl EngineConfig {
    /// Add a prelude script to load at construction.
    pub fn with_prelude(mut self, path: impl Into<PathBuf>) -> Self {
        self.prelude_paths.push(path.into());
        self
    }

    /// Override the per-invocation deadline.
    pub fn with_invoke_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.invoke_deadline = deadline;
        self
    }
}

/// Builds engines on demand.
///
/// Called from the worker's own thread — the engine it returns is not
/// `Send` and stays where it was built.
pub trait EngineFactory: Send + Sync + 'static {
    /// Build a fresh engine with its baseline captured.
    fn build(&self) -> Result<ScriptEngine, EngineFatal>;
}

/// The default factory: a Lua interpreter bootstrapped per [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct LuaEngineFactory {
    config: EngineConfig,
}

impl LuaEngineFactory {
    /// Create a factory for the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl EngineFactory for LuaEngineFactory {
    fn build(&self) -> Result<ScriptEngine, EngineFatal> {
        ScriptEngine::bootstrap(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_has_deadline() {
        let config = EngineConfig::default();
        assert!(config.invoke_deadline.is_some());
        assert!(config.prelude_paths.is_empty());
    }

    #[test]
    fn factory_builds_working_engine() {
        let factory = LuaEngineFactory::default();
        let engine = factory.build().expect("build");
        assert!(engine.baseline().contains("applyModifier"));
    }

    #[test]
    fn configured_prelude_joins_the_baseline() {
        let mut file = tempfile::Builder::new()
            .suffix(".lua")
            .tempfile()
            .expect("prelude file");
        file.write_all(b"function siteHelper() return true end")
            .expect("write prelude");

        let factory = LuaEngineFactory::new(EngineConfig::default().with_prelude(file.path()));
        let engine = factory.build().expect("build");
        assert!(engine.baseline().contains("siteHelper"));

        // Baseline names survive a reset by definition.
        engine.reset().expect("reset");
        assert!(engine.enumerate_names().contains("siteHelper"));
    }

    #[test]
    fn missing_prelude_is_fatal() {
        let factory = LuaEngineFactory::new(
            EngineConfig::default().with_prelude("/nonexistent/site_prelude.lua"),
        );
        let err = factory.build().unwrap_err();
        assert_eq!(err.phase(), "prelude");
    }
}
