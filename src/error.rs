//! Crate-level error types for aggregate operations.
//!
//! Every operation that crosses the actor boundary resolves to either a
//! success value or an [`Error`]. Conflicts from optimistic appends never
//! appear here -- they are recovered internally by the commit retry loop.

use std::time::Duration;

/// Classifies a caught handler failure.
///
/// Handler code (command evaluation, event application, commit-time
/// projections) runs on the actor's turn; any failure is caught at the
/// actor boundary and reported with its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A command handler's `eval` returned an error.
    Eval,
    /// An event handler's `apply` failed.
    Apply,
    /// A commit-time projection rejected the append.
    Projection,
    /// Handler code panicked.
    Panic,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Eval => "eval",
            Self::Apply => "apply",
            Self::Projection => "projection",
            Self::Panic => "panic",
        };
        f.write_str(s)
    }
}

/// Error returned by aggregate operations.
///
/// The caller-visible shape is `{kind, message, trace}`: [`Error::kind`]
/// yields the machine-readable kind tag, `Display` the message, and
/// [`Error::trace`] the captured handler trace when one exists.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No handler is registered for the command or event type tag.
    #[error("no handler registered for type '{0}'")]
    InvalidHandler(String),

    /// The command has the wrong shape for this aggregate.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The event store could not serve the request.
    #[error("event store unavailable: {0}")]
    StoreUnavailable(String),

    /// The hybrid logical clock failed to produce a timestamp.
    #[error("clock failure: {0}")]
    ClockFailure(String),

    /// Handler code failed; the actor survives with unchanged state.
    #[error("handler fault ({kind}): {trace}")]
    HandlerFault {
        /// Where the fault originated.
        kind: FaultKind,
        /// Error message or panic payload captured at the boundary.
        trace: String,
    },

    /// The aggregate actor has exited; the directory will start a fresh
    /// one on the next request.
    #[error("aggregate actor is no longer running")]
    ActorGone,

    /// The caller's deadline expired before the actor replied. The
    /// in-flight turn is not cancelled.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Machine-readable kind tag for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidHandler(_) => "invalid_handler",
            Self::InvalidCommand(_) => "invalid_command",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::ClockFailure(_) => "clock_failure",
            Self::HandlerFault { .. } => "handler_fault",
            Self::ActorGone => "actor_gone",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Captured handler trace, when this error carries one.
    pub fn trace(&self) -> Option<&str> {
        match self {
            Self::HandlerFault { trace, .. } => Some(trace),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_handler_names_the_tag() {
        let err = Error::InvalidHandler("account.unknown".to_string());
        assert_eq!(
            err.to_string(),
            "no handler registered for type 'account.unknown'"
        );
        assert_eq!(err.kind(), "invalid_handler");
    }

    #[test]
    fn handler_fault_carries_kind_and_trace() {
        let err = Error::HandlerFault {
            kind: FaultKind::Panic,
            trace: "index out of bounds".to_string(),
        };
        assert_eq!(err.kind(), "handler_fault");
        assert_eq!(err.trace(), Some("index out of bounds"));
        assert!(err.to_string().contains("panic"));
    }

    #[test]
    fn non_fault_errors_have_no_trace() {
        assert_eq!(Error::ActorGone.trace(), None);
        assert_eq!(Error::InvalidCommand("bad".into()).trace(), None);
    }

    #[test]
    fn fault_kind_display() {
        assert_eq!(FaultKind::Eval.to_string(), "eval");
        assert_eq!(FaultKind::Apply.to_string(), "apply");
        assert_eq!(FaultKind::Projection.to_string(), "projection");
        assert_eq!(FaultKind::Panic.to_string(), "panic");
    }

    #[test]
    fn timeout_display_mentions_duration() {
        let err = Error::Timeout(Duration::from_secs(5));
        assert!(err.to_string().contains("5s"));
    }

    // Errors cross tokio channel boundaries, which requires Send + Sync.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<Error>();
        }
    };
}
