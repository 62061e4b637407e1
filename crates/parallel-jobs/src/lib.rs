//! 'parallel-jobs' - run async jobs concurrently under a shared, cancellable context.
//!
//! This library provides three small coordination patterns over a single job
//! abstraction, built on Tokio tasks and [`tokio_util`] cancellation tokens:
//!
//! - [`do_all`]: run fire-and-forget jobs; succeed only if all succeed.
//! - [`map`]: apply one job to many inputs; results keep input order.
//! - [`first_of`]: race several jobs; the first success wins.
//!
//! Every batch runs under a [`JobContext`] derived from the caller's context.
//! The first failure of an all-of batch cancels that context, as does the
//! first success of a race. A [`JobConfig`] timeout bounds the whole batch.
//!
//! Cancellation is cooperative: each job is stopped at its next `.await`
//! once its batch ends, and long synchronous sections should call
//! [`JobContext::check`].
//!
//! # Example
//!
//! ```
//! use parallel_jobs::{BoxError, Job, JobContext};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mirror = |delay_ms: u64, name: &'static str| -> Job<(), &'static str> {
//!     Job::new(move |_ctx, ()| async move {
//!         tokio::time::sleep(Duration::from_millis(delay_ms)).await;
//!         Ok::<_, BoxError>(name)
//!     })
//! };
//!
//! let fastest = parallel_jobs::first_of(
//!     &JobContext::new(),
//!     (),
//!     [mirror(50, "eu"), mirror(5, "us"), mirror(500, "ap")],
//! )
//! .await?;
//! assert_eq!(fastest, "us");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod job;

#[cfg(feature = "observability")]
pub mod observability;

pub use config::JobConfig;
pub use context::{ContextError, ContextGuard, JobContext};
pub use controller::JobController;
pub use error::{BoxError, ParallelError};
pub use job::{BasicJob, BasicJobs, Job, JobFuture, JobHandler, Jobs};

use std::fmt::Display;

/// Runs `jobs` concurrently under a default [`JobController`].
///
/// See [`JobController::do_all`].
pub async fn do_all<E, I>(parent: &JobContext, jobs: I) -> Result<(), ParallelError<E>>
where
    I: IntoIterator<Item = BasicJob<E>>,
    E: Display + Send + 'static,
{
    JobController::default().do_all(parent, jobs).await
}

/// Applies `job` to every input concurrently under a default [`JobController`].
///
/// See [`JobController::map`].
pub async fn map<In, Out, E, I>(
    parent: &JobContext,
    inputs: I,
    job: Job<In, Out, E>,
) -> Result<Vec<Out>, ParallelError<E>>
where
    I: IntoIterator<Item = In>,
    In: Send + 'static,
    Out: Send + 'static,
    E: Display + Send + 'static,
{
    JobController::default().map(parent, inputs, job).await
}

/// Races `jobs` on clones of `input` under a default [`JobController`].
///
/// See [`JobController::first_of`].
pub async fn first_of<In, Out, E, I>(
    parent: &JobContext,
    input: In,
    jobs: I,
) -> Result<Out, ParallelError<E>>
where
    I: IntoIterator<Item = Job<In, Out, E>>,
    In: Clone + Send + 'static,
    Out: Send + 'static,
    E: Display + Send + 'static,
{
    JobController::default().first_of(parent, input, jobs).await
}
