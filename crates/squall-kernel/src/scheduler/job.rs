//! The job contract — context tokens, the `ScriptJob` trait, and the
//! delivery plumbing that carries a typed result back to its submitter.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::engine::{EngineFatal, ScriptEngine, ScriptError};

/// A job-kind-scoped equality token.
///
/// The worker records the token of the last successfully executed job
/// and asks each new job whether it is contextually equal to it; equal
/// means the expensive namespace reset may be skipped. Tokens from
/// different kinds never match, and a `fresh` token matches nothing —
/// not even another fresh token of the same kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextToken {
    kind: &'static str,
    /// Kind-specific discriminating parameters. `None` means the token
    /// unconditionally refuses to match (a reset always follows).
    scope: Option<String>,
}

impl ContextToken {
    /// A token that never matches anything: every run of this kind is
    /// preceded by a reset.
    pub fn fresh(kind: &'static str) -> Self {
        Self { kind, scope: None }
    }

    /// A token that matches a previous token of the same kind with the
    /// same discriminating scope.
    pub fn scoped(kind: &'static str, scope: impl Into<String>) -> Self {
        Self {
            kind,
            scope: Some(scope.into()),
        }
    }

    /// The job kind this token belongs to.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// True if this token can ever match (i.e. it carries a scope).
    pub fn is_reusable(&self) -> bool {
        self.scope.is_some()
    }

    /// Whether a job holding this token may skip the reset after a job
    /// that recorded `previous`.
    pub fn matches(&self, previous: &ContextToken) -> bool {
        self.kind == previous.kind && self.scope.is_some() && self.scope == previous.scope
    }
}

/// One unit of work: stage inputs into an engine, invoke an entry
/// point, extract a typed result.
///
/// Jobs execute on the worker's thread against its exclusively-owned
/// engine; the job itself must be `Send` to cross the queue, the engine
/// never is.
pub trait ScriptJob: Send + 'static {
    /// The typed result delivered to the submitter.
    type Output: Send + 'static;

    /// The token recorded against this worker after a successful run.
    fn context_token(&self) -> ContextToken;

    /// Whether this job may observe the engine state left by the job
    /// that recorded `previous`. Pure and consistent; must be `false`
    /// whenever `previous` came from a different kind.
    fn is_contextually_equal(&self, previous: &ContextToken) -> bool {
        self.context_token().matches(previous)
    }

    /// Globals (beyond the baseline and names attributed to loaded
    /// script files) this job is allowed to leave bound after a
    /// successful run. Anything else is leakage: the worker logs it and
    /// refuses to record this job's context token, so the next job
    /// resets. Only consulted for reusable tokens.
    fn declared_globals(&self) -> Vec<String> {
        Vec::new()
    }

    /// Bind inputs, ensure the relevant script is loaded, invoke the
    /// entry point, and extract the typed result.
    fn stage_and_run(&self, engine: &ScriptEngine) -> Result<Self::Output, ScriptError>;
}

/// Callbacks for asynchronous submission. Exactly one of the two is
/// invoked, from the worker's thread; hopping to another execution
/// context (a UI event loop, a tokio task) is the listener's business.
pub trait JobListener<R>: Send + 'static {
    fn on_success(self: Box<Self>, result: R);
    fn on_failure(self: Box<Self>, error: PoolError);
}

/// Closures work directly as listeners:
/// `pool.submit_async(job, |outcome| { ... })`.
impl<R, F> JobListener<R> for F
where
    F: FnOnce(Result<R, PoolError>) + Send + 'static,
{
    fn on_success(self: Box<Self>, result: R) {
        self(Ok(result))
    }

    fn on_failure(self: Box<Self>, error: PoolError) {
        self(Err(error))
    }
}

/// What submitters see when a job cannot produce a result.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The job's own execution failed.
    #[error(transparent)]
    Script(#[from] ScriptError),
    /// No engine could be built (or rebuilt) to run the job.
    #[error(transparent)]
    Engine(#[from] EngineFatal),
    /// The pool has been shut down; no new submissions are accepted.
    #[error("job queue is closed")]
    QueueClosed,
    /// The worker terminated before delivering a result. Defensive;
    /// not expected in normal operation.
    #[error("worker terminated before delivering a result")]
    WorkerGone,
}

/// How a finished job reaches its submitter.
pub(crate) enum Delivery<R> {
    /// Blocking and async submitters wait on a oneshot.
    Channel(oneshot::Sender<Result<R, PoolError>>),
    /// Callback submitters get their listener invoked.
    Listener(Box<dyn JobListener<R>>),
}

impl<R: 'static> Delivery<R> {
    fn deliver(self, outcome: Result<R, PoolError>) {
        match self {
            // A vanished submitter is not the worker's problem.
            Delivery::Channel(tx) => drop(tx.send(outcome)),
            Delivery::Listener(listener) => match outcome {
                Ok(result) => listener.on_success(result),
                Err(error) => listener.on_failure(error),
            },
        }
    }
}

/// Type-erased queue item: a job paired with its delivery.
///
/// The worker drives jobs through this trait so the queue can hold
/// arbitrary output types.
pub(crate) trait QueuedJob: Send {
    fn kind(&self) -> &'static str;
    fn context_token(&self) -> ContextToken;
    fn is_contextually_equal(&self, previous: &ContextToken) -> bool;
    fn declared_globals(&self) -> Vec<String>;
    /// Run the job; on success the result is delivered before returning.
    fn run(&mut self, engine: &ScriptEngine) -> Result<(), ScriptError>;
    /// Deliver a failure without running (or after a failed run).
    fn fail(self: Box<Self>, error: PoolError);
}

pub(crate) struct Envelope<J: ScriptJob> {
    job: J,
    delivery: Option<Delivery<J::Output>>,
}

impl<J: ScriptJob> Envelope<J> {
    pub(crate) fn new(job: J, delivery: Delivery<J::Output>) -> Self {
        Self {
            job,
            delivery: Some(delivery),
        }
    }
}

impl<J: ScriptJob> QueuedJob for Envelope<J> {
    fn kind(&self) -> &'static str {
        self.job.context_token().kind()
    }

    fn context_token(&self) -> ContextToken {
        self.job.context_token()
    }

    fn is_contextually_equal(&self, previous: &ContextToken) -> bool {
        self.job.is_contextually_equal(previous)
    }

    fn declared_globals(&self) -> Vec<String> {
        self.job.declared_globals()
    }

    fn run(&mut self, engine: &ScriptEngine) -> Result<(), ScriptError> {
        let result = self.job.stage_and_run(engine)?;
        if let Some(delivery) = self.delivery.take() {
            delivery.deliver(Ok(result));
        }
        Ok(())
    }

    fn fail(mut self: Box<Self>, error: PoolError) {
        if let Some(delivery) = self.delivery.take() {
            delivery.deliver(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tokens_never_match() {
        let a = ContextToken::fresh("metadata-fetch");
        let b = ContextToken::fresh("metadata-fetch");
        assert!(!a.matches(&b));
        assert!(!a.matches(&a.clone()));
        assert!(!a.is_reusable());
    }

    #[test]
    fn scoped_tokens_match_on_kind_and_scope() {
        let a = ContextToken::scoped("event-modify", "applyDefaults::FL.W");
        let b = ContextToken::scoped("event-modify", "applyDefaults::FL.W");
        assert!(a.matches(&b));
        assert!(a.is_reusable());
    }

    #[test]
    fn scoped_tokens_differ_on_scope() {
        let a = ContextToken::scoped("event-modify", "applyDefaults::FL.W");
        let b = ContextToken::scoped("event-modify", "applyDefaults::FA.Y");
        assert!(!a.matches(&b));
    }

    #[test]
    fn tokens_from_different_kinds_never_match() {
        let a = ContextToken::scoped("event-modify", "same");
        let b = ContextToken::scoped("validate", "same");
        assert!(!a.matches(&b));
    }

    #[test]
    fn scoped_token_does_not_match_fresh() {
        let a = ContextToken::scoped("event-modify", "x");
        let b = ContextToken::fresh("event-modify");
        assert!(!a.matches(&b));
    }
}
