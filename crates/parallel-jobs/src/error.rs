//! Error types for batch execution.

use std::any::Any;

use thiserror::Error;

use crate::context::ContextError;

/// The default job error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by a batch.
///
/// Exactly one error, or none, is reported per batch. A job's own error is
/// passed through untouched as [`ParallelError::Job`] and displayed as is.
///
/// The [`std::error::Error`] impl only needs `E: Debug + Display`, so the
/// default `ParallelError<BoxError>` converts into `Box<dyn Error>` with `?`.
#[derive(Debug, Error)]
pub enum ParallelError<E = BoxError> {
    /// A job reported a failure.
    #[error("{0}")]
    Job(E),

    /// The batch context was cancelled before the batch could complete.
    #[error("batch cancelled")]
    Cancelled,

    /// The batch timeout, or a parent deadline, elapsed.
    #[error("batch deadline exceeded")]
    DeadlineExceeded,

    /// A job panicked. The panic was caught inside its task.
    #[error("job panicked: {0}")]
    JobPanicked(String),

    /// A race was started without any job to run.
    #[error("no jobs to run")]
    EmptyBatch,
}

impl<E> ParallelError<E> {
    /// Returns `true` for [`ParallelError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` for [`ParallelError::DeadlineExceeded`].
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }

    /// Returns `true` when the batch ended because its context ended.
    pub fn is_context_error(&self) -> bool {
        self.is_cancelled() || self.is_deadline_exceeded()
    }

    /// The job's own error, if that is what ended the batch.
    pub fn job_error(&self) -> Option<&E> {
        match self {
            Self::Job(err) => Some(err),
            _ => None,
        }
    }

    /// Consumes the error, returning the job's own error if there is one.
    pub fn into_job_error(self) -> Option<E> {
        match self {
            Self::Job(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::JobPanicked(message)
    }
}

impl<E> From<ContextError> for ParallelError<E> {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}
