// SPDX-License-Identifier: Apache-2.0

use std::{error::Error as StdError, sync::Arc};

use thiserror::Error;

use crate::scope::ScopeId;

/// The error type carried by every fallible operation outcome.
///
/// `Halt` is deliberately *not* a variant here: per the quiet-cancellation
/// rule, halting a frame is never an error (see [`crate::task::Outcome`]).
#[allow(missing_docs)]
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Raised by an operation body itself ("user error").
    #[error("operation failed: {0}")]
    Operation(Arc<dyn StdError + Send + Sync>),

    /// A child frame failed; promoted to the parent at the yield site that
    /// spawned or awaited it ("child error").
    #[error("child frame {0} failed: {1}")]
    Child(ScopeId, Arc<Error>),

    /// Raised during cleanup. The first cause is kept as the reported
    /// error; the rest are recorded as suppressed, never dropped.
    #[error("teardown failed: {cause}")]
    Teardown {
        /// The first cleanup error encountered.
        cause: Arc<Error>,
        /// Additional cleanup errors, in the order they occurred.
        suppressed: Vec<Error>,
    },

    /// A `resource`'s setup body threw before reaching `provide`. This
    /// surfaces at the yield site, as a foreground error, not at scope
    /// termination.
    #[error("resource setup failed: {0}")]
    ResourceSetup(Arc<Error>),

    /// `withTimeout` lost the race against its deadline.
    #[error("operation timed out")]
    Timeout,

    /// A scope operation was attempted after the scope became terminal.
    #[error("scope {0} is no longer accepting children")]
    ScopeTerminated(ScopeId),

    /// Sending on a channel whose port has been closed, or to a subscriber
    /// that has gone away.
    #[error("channel is closed")]
    ChannelClosed,

    /// Internal sentinel threaded through `?` when a frame observes a halt
    /// partway through its body (e.g. awaiting a task that itself halted).
    /// Never constructed by operation bodies directly and never reaches a
    /// user: [`crate::frame::evaluate`] intercepts it and reports the
    /// frame's outcome as [`crate::task::Outcome::Halt`], not as an error.
    /// Mirrors `futures::future::Aborted` — an error-shaped value
    /// standing in for a non-error condition.
    #[error("frame halted")]
    #[doc(hidden)]
    Halted,
}

impl Error {
    /// Wraps an arbitrary user error as an [`Error::Operation`].
    pub fn from_user<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Error::Operation(Arc::new(err))
    }

    /// Aggregates cleanup errors per : first one wins, the rest
    /// are suppressed but retained.
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Error> {
        if errors.is_empty() {
            return None;
        }
        let cause = Arc::new(errors.remove(0));
        if errors.is_empty() {
            // Re-surface the single cause directly; no need to wrap a
            // one-element "suppressed" list around it.
            return Some((*cause).clone());
        }
        Some(Error::Teardown {
            cause,
            suppressed: errors,
        })
    }
}

/// Defines an error's log level, used when deciding how loudly a frame's
/// failure should be reported as it crosses a scope boundary.
pub trait ErrorLevel: StdError {
    /// Returns the log level for this error.
    fn level(&self) -> log::Level {
        log::Level::Error
    }
}

impl ErrorLevel for Error {
    fn level(&self) -> log::Level {
        match self {
            Error::ScopeTerminated(_) => log::Level::Warn,
            _ => log::Level::Error,
        }
    }
}

impl ErrorLevel for std::convert::Infallible {}
