/// Structured logging, multi-line error formatting, and error
/// aggregation (C11).
///
/// One shared `Fail`/`Context`-wrapped error kind rather than a bespoke
/// enum per module, since every orchestrator-level failure needs the
/// same "log once, surface once" treatment.
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicUsize, Ordering};

use failure::{Backtrace, Context, Fail};

use crate::promise::PromiseError;

/// The sentinel result value the CLI must treat specially: the failure
/// has already been reported (once) via the structured logger or
/// stderr, and must not be printed a second time.
pub const ALREADY_LOGGED_ERROR: &str = "already-logged-error";

#[derive(Debug)]
pub struct OrchestratorError {
    inner: Context<OrchestratorErrorKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum OrchestratorErrorKind {
    #[fail(display = "{}", _0)]
    AlreadyLoggedError(String),

    #[fail(display = "{} '{}' is already in use by environment '{}'", _0, _1, _2)]
    Conflict(String, String, String),

    #[fail(display = "missing permission: {} on {}", _0, _1)]
    MissingPermission(String, String),

    #[fail(display = "health check for {} timed out after {} attempts", _0, _1)]
    HealthCheckTimeout(String, u32),

    #[fail(display = "operation '{}' on {} failed", _0, _1)]
    ExternalOperation(String, String),
}

impl Fail for OrchestratorError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}
impl Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}
impl From<OrchestratorErrorKind> for OrchestratorError {
    fn from(kind: OrchestratorErrorKind) -> OrchestratorError {
        OrchestratorError { inner: Context::new(kind) }
    }
}
impl From<Context<OrchestratorErrorKind>> for OrchestratorError {
    fn from(inner: Context<OrchestratorErrorKind>) -> OrchestratorError {
        OrchestratorError { inner }
    }
}

/// Tracks how many distinct, non-`dependency-failed` errors have been
/// logged during one install/uninstall run, so the invariant that the
/// number of lines logged at Error level equals the number of distinct
/// non-dependency-failed errors can be asserted in tests.
#[derive(Default)]
pub struct ErrorSink {
    logged: AtomicUsize,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `err` at Error level exactly once and record that it was
    /// logged. Multi-line messages go to stderr (red, "Error:" prefix);
    /// single-line messages go through the structured logger. The CLI
    /// binary owns the actual coloring; this only
    /// decides *which* sink a message goes to and returns the text for
    /// it to print.
    pub fn log_once(&self, err: &failure::Error) -> Option<String> {
        self.logged.fetch_add(1, Ordering::SeqCst);
        let msg = err.to_string();
        if msg.contains('\n') {
            Some(format!("Error: {}", msg))
        } else {
            log::error!("{}", msg);
            None
        }
    }

    pub fn logged_count(&self) -> usize {
        self.logged.load(Ordering::SeqCst)
    }
}

/// Walk a `PromiseGroup`'s collected outcomes, logging every non-
/// `dependency-failed` error exactly once and returning the aggregate
/// result expected by the CLI: `Ok(())` if nothing failed, or an error
/// whose message is the `ALREADY_LOGGED_ERROR` sentinel if anything did.
pub fn aggregate(sink: &ErrorSink, errors: &[PromiseError]) -> Result<(), failure::Error> {
    let mut stderr_lines = Vec::new();
    let mut any_real_error = false;
    for e in errors {
        if e.is_dependency_failed() {
            continue;
        }
        any_real_error = true;
        let as_failure = failure::err_msg(e.to_string());
        if let Some(line) = sink.log_once(&as_failure) {
            stderr_lines.push(line);
        }
    }
    for line in &stderr_lines {
        eprintln!("{}", line);
    }
    if any_real_error {
        Err(OrchestratorErrorKind::AlreadyLoggedError(ALREADY_LOGGED_ERROR.to_string()).into())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn aggregate_suppresses_dependency_failed() {
        let sink = ErrorSink::new();
        let errors = vec![
            PromiseError::DependencyFailed,
            PromiseError::DependencyFailed,
            PromiseError::Failed(Arc::new(failure::err_msg("boom"))),
        ];
        let result = aggregate(&sink, &errors);
        assert!(result.is_err());
        assert_eq!(sink.logged_count(), 1);
    }

    #[test]
    fn aggregate_ok_when_only_dependency_failures() {
        let sink = ErrorSink::new();
        let errors = vec![PromiseError::DependencyFailed];
        assert!(aggregate(&sink, &errors).is_ok());
        assert_eq!(sink.logged_count(), 0);
    }

    #[test]
    fn multiline_errors_go_to_stderr_not_logger() {
        let sink = ErrorSink::new();
        let err = failure::err_msg("line one\nline two");
        let formatted = sink.log_once(&err);
        assert!(formatted.unwrap().starts_with("Error: "));
    }
}
