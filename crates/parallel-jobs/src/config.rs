//! Configuration for batch execution.
//!
//! A [`JobConfig`] carries the per-batch timeout and the tracing dispatcher
//! that receives the controller's diagnostics, and derives the context every
//! batch runs under.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::Dispatch;

use crate::context::{ContextGuard, JobContext};

/// Configuration for a [`JobController`](crate::JobController).
///
/// # Examples
///
/// ```
/// use parallel_jobs::JobConfig;
/// use std::time::Duration;
///
/// let config = JobConfig::new().with_timeout(Duration::from_secs(30));
/// assert_eq!(config.timeout, Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfig {
    /// Upper bound on the duration of each batch.
    ///
    /// `None` or a zero duration means the batch is bounded only by its
    /// parent context.
    #[serde(default)]
    pub timeout: Option<Duration>,

    /// Sink for the controller's spans and events.
    ///
    /// When `None`, the controller captures the default dispatcher once, at
    /// construction time.
    #[serde(skip)]
    pub logger: Option<Dispatch>,
}

impl JobConfig {
    /// Creates a configuration with no timeout and the default logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-batch timeout. A zero duration removes the bound.
    ///
    /// # Examples
    ///
    /// ```
    /// use parallel_jobs::JobConfig;
    /// use std::time::Duration;
    ///
    /// let config = JobConfig::new().with_timeout(Duration::ZERO);
    /// assert!(config.timeout.is_none());
    /// ```
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Removes the per-batch timeout.
    pub fn with_no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Routes the controller's diagnostics to `logger` instead of the default
    /// dispatcher.
    pub fn with_logger(mut self, logger: impl Into<Dispatch>) -> Self {
        self.logger = Some(logger.into());
        self
    }

    /// The timeout that actually applies, ignoring zero durations.
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|timeout| !timeout.is_zero())
    }

    /// Fills in the logger from the current default dispatcher if unset.
    pub(crate) fn resolve_logger(&mut self) -> Dispatch {
        self.logger
            .get_or_insert_with(|| tracing::dispatcher::get_default(Dispatch::clone))
            .clone()
    }

    /// Derives the context a batch runs under.
    ///
    /// The child can be cancelled independently of `parent` and, when a
    /// timeout is configured, expires on its own. The returned guard must
    /// outlive the batch; dropping it cancels the child.
    pub fn context(&self, parent: &JobContext) -> (JobContext, ContextGuard) {
        let ctx = match self.effective_timeout() {
            Some(timeout) => parent.with_timeout(timeout),
            None => parent.child(),
        };
        let guard = ctx.guard();
        (ctx, guard)
    }
}
