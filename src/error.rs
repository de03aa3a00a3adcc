use std::io;

use thiserror::Error;

/// The error returned by [`Executor`][crate::Executor] operations.
///
/// `E` is the error type reported by the candidate functions. A candidate error is never wrapped
/// or rewritten on its way out: the one reported in [`Error::Failed`] is exactly the value the
/// candidate returned.
#[derive(Debug, Error)]
pub enum Error<E> {
    /// No candidate function was supplied, so nothing was attempted.
    #[error("no function provided")]
    NoFunction,

    #[error(transparent)]
    UnknownMethod(#[from] UnknownMethod),

    /// The caller's scope was cancelled before any candidate delivered a result.
    #[error("execution cancelled")]
    Cancelled,

    /// Every candidate of the deciding group abstained with [`Failure::Skip`][crate::Failure].
    #[error("all skipped")]
    AllSkipped,

    /// A thread needed to run a task could not be spawned.
    #[error("failed to spawn task thread")]
    Spawn(#[source] io::Error),

    /// The last error reported by a candidate of the deciding group.
    #[error("{0}")]
    Failed(E),
}

impl<E> Error<E> {
    /// Returns the candidate error, if this is [`Error::Failed`].
    pub fn into_failed(self) -> Option<E> {
        match self {
            Error::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<DispatchError> for Error<E> {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Cancelled(_) => Error::Cancelled,
            DispatchError::Spawn(e) => Error::Spawn(e),
        }
    }
}

/// An error returned by [`Pool::acquire`][crate::Pool::acquire] when the caller's scope is
/// cancelled before the permits could be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("permit acquisition cancelled")]
pub struct Cancelled;

/// An error returned when parsing a [`Method`][crate::Method] from an unrecognized value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown method `{0}`")]
pub struct UnknownMethod(pub(crate) String);

/// An error returned by [`Pool::run`][crate::Pool::run].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("failed to spawn task thread")]
    Spawn(#[source] io::Error),
}

/// An error returned by [`JobQueue`][crate::JobQueue] operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,

    #[error("job queue is not started")]
    NotStarted,

    #[error("job queue is already started")]
    AlreadyStarted,

    #[error("failed to spawn job queue thread")]
    Spawn(#[source] io::Error),
}
