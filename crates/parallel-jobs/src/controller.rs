//! The batch controller.
//!
//! [`JobController`] runs batches of jobs concurrently on the Tokio runtime
//! under a context derived from the caller's context and its [`JobConfig`].
//!
//! Two coordination patterns are provided:
//!
//! - **All-of** ([`do_all`](JobController::do_all), [`map`](JobController::map)):
//!   every job must succeed. The first failure, in arrival order, cancels the
//!   batch and becomes its result. All tasks are joined before returning.
//! - **First-of** ([`first_of`](JobController::first_of)): the first job to
//!   succeed wins. Failures are remembered but do not stop the race unless
//!   every job fails or the context ends. Losing jobs are cancelled and
//!   drained in the background.

use std::fmt::Display;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument, Span, debug, debug_span, info_span, warn};

use crate::config::JobConfig;
use crate::context::{ContextError, JobContext};
use crate::error::ParallelError;
use crate::job::{BasicJob, Job, JobFuture};

/// Runs batches of jobs under a shared configuration.
///
/// # Examples
///
/// ```
/// use parallel_jobs::{BoxError, Job, JobConfig, JobContext, JobController};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let ctrl = JobController::new(JobConfig::new().with_timeout(Duration::from_secs(5)));
/// let square: Job<u64, u64> = Job::new(|_ctx, n| async move { Ok::<_, BoxError>(n * n) });
///
/// let squares = ctrl.map(&JobContext::new(), vec![1, 2, 3], square).await?;
/// assert_eq!(squares, vec![1, 4, 9]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct JobController {
    config: JobConfig,
    dispatch: Dispatch,
}

impl Default for JobController {
    fn default() -> Self {
        Self::new(JobConfig::default())
    }
}

impl JobController {
    /// Creates a controller.
    ///
    /// A missing logger is resolved here, once, to the dispatcher that is the
    /// default at the time of the call.
    pub fn new(mut config: JobConfig) -> Self {
        let dispatch = config.resolve_logger();
        Self { config, dispatch }
    }

    /// The configuration, with its logger resolved.
    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Runs every job concurrently and succeeds only if all of them do.
    ///
    /// The first error cancels the remaining jobs and is returned. An empty
    /// batch succeeds immediately.
    pub async fn do_all<E, I>(&self, parent: &JobContext, jobs: I) -> Result<(), ParallelError<E>>
    where
        I: IntoIterator<Item = BasicJob<E>>,
        E: Display + Send + 'static,
    {
        let calls: Vec<_> = jobs
            .into_iter()
            .map(|job| move |ctx: JobContext| job.call(ctx))
            .collect();
        let span = self.batch_span(|| {
            info_span!("parallel_do_all", batch = calls.len(), timeout = ?self.config.timeout)
        });

        self.run_all(parent, calls)
            .instrument(span)
            .with_subscriber(self.dispatch.clone())
            .await
            .map(|_| ())
    }

    /// Applies `job` to every input concurrently.
    ///
    /// On success `result[i]` is the output for `inputs[i]`, whatever order the
    /// jobs finished in. The first error cancels the remaining jobs and is
    /// returned; no partial results are kept.
    pub async fn map<In, Out, E, I>(
        &self,
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
        let calls: Vec<_> = inputs
            .into_iter()
            .map(|input| {
                let job = job.clone();
                move |ctx: JobContext| job.call(ctx, input)
            })
            .collect();
        let span = self.batch_span(|| {
            info_span!("parallel_map", batch = calls.len(), timeout = ?self.config.timeout)
        });

        self.run_all(parent, calls)
            .instrument(span)
            .with_subscriber(self.dispatch.clone())
            .await
    }

    /// Races the jobs, each on its own clone of `input`, and returns the first
    /// successful output.
    ///
    /// If every job fails, the first failure to arrive is returned. If the
    /// context ends first, the first failure seen so far is returned, or the
    /// context error when there was none. Running with no jobs yields
    /// [`ParallelError::EmptyBatch`].
    pub async fn first_of<In, Out, E, I>(
        &self,
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
        let jobs: Vec<_> = jobs.into_iter().collect();
        if jobs.is_empty() {
            return Err(ParallelError::EmptyBatch);
        }
        let span = self.batch_span(|| {
            info_span!("parallel_first_of", batch = jobs.len(), timeout = ?self.config.timeout)
        });

        self.race(parent, input, jobs)
            .instrument(span)
            .with_subscriber(self.dispatch.clone())
            .await
    }

    // Spans must be created under the controller's dispatcher to be recorded
    // by it.
    fn batch_span(&self, make: impl FnOnce() -> Span) -> Span {
        tracing::dispatcher::with_default(&self.dispatch, make)
    }

    async fn run_all<Out, E, C>(
        &self,
        parent: &JobContext,
        calls: Vec<C>,
    ) -> Result<Vec<Out>, ParallelError<E>>
    where
        C: FnOnce(JobContext) -> JobFuture<Out, E> + Send + 'static,
        Out: Send + 'static,
        E: Display + Send + 'static,
    {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let total = calls.len();
        let (ctx, guard) = self.config.context(parent);
        debug!(total, "starting batch");

        let mut tasks = JoinSet::new();
        for (index, call) in calls.into_iter().enumerate() {
            let ctx = ctx.clone();
            tasks.spawn(
                async move { (index, run_job(ctx, call).await) }
                    .instrument(debug_span!("parallel_job", index))
                    .with_subscriber(self.dispatch.clone()),
            );
        }

        let mut slots: Vec<Option<Out>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut failure: Option<ParallelError<E>> = None;

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok((index, Ok(value))) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(value);
                    }
                    continue;
                }
                Ok((index, Err(err))) => (Some(index), err),
                Err(join_err) => (None, ParallelError::JobPanicked(join_err.to_string())),
            };

            if failure.is_none() {
                let (index, err) = outcome;
                warn!(index = ?index, error = %err, "job failed, cancelling batch");
                ctx.cancel();
                failure = Some(err);
            }
        }

        if failure.is_none() {
            failure = ctx.err().map(ParallelError::from);
        }
        guard.release();

        match failure {
            Some(err) => Err(err),
            None => {
                debug!(total, "batch completed");
                Ok(slots.into_iter().flatten().collect())
            }
        }
    }

    async fn race<In, Out, E>(
        &self,
        parent: &JobContext,
        input: In,
        jobs: Vec<Job<In, Out, E>>,
    ) -> Result<Out, ParallelError<E>>
    where
        In: Clone + Send + 'static,
        Out: Send + 'static,
        E: Display + Send + 'static,
    {
        let (ctx, guard) = self.config.context(parent);
        let (tx, mut rx) = mpsc::unbounded_channel();
        debug!(total = jobs.len(), "starting race");

        let mut tasks = JoinSet::new();
        for (index, job) in jobs.into_iter().enumerate() {
            let ctx = ctx.clone();
            let tx = tx.clone();
            let input = input.clone();
            tasks.spawn(
                async move {
                    let outcome = run_job(ctx.clone(), move |ctx| job.call(ctx, input)).await;
                    // Outcomes produced after the race ended have no reader.
                    if !ctx.is_done() {
                        let _ = tx.send((index, outcome));
                    }
                }
                .instrument(debug_span!("parallel_job", index))
                .with_subscriber(self.dispatch.clone()),
            );
        }
        // The channel closes once every task has dropped its sender.
        drop(tx);

        let mut first_failure: Option<ParallelError<E>> = None;
        let result = loop {
            tokio::select! {
                biased;
                _ = ctx.done() => {
                    break Err(first_failure.take().unwrap_or_else(|| context_failure(&ctx)));
                }
                received = rx.recv() => match received {
                    Some((index, Ok(value))) => {
                        debug!(index, "job won the race");
                        break Ok(value);
                    }
                    Some((index, Err(err))) => {
                        debug!(index, error = %err, "job failed, race continues");
                        if first_failure.is_none() {
                            first_failure = Some(err);
                        }
                    }
                    None => {
                        break Err(first_failure.take().unwrap_or_else(|| context_failure(&ctx)));
                    }
                },
            }
        };

        guard.release();
        self.drain(tasks);
        result
    }

    // Losing jobs were told to stop by the released context; reap their tasks
    // without holding up the caller.
    fn drain(&self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }
        tokio::spawn(
            async move {
                let mut drained = 0usize;
                while let Some(joined) = tasks.join_next().await {
                    drained += 1;
                    if let Err(err) = joined {
                        warn!(error = %err, "job task ended abnormally");
                    }
                }
                debug!(drained, "race drained");
            }
            .in_current_span()
            .with_subscriber(self.dispatch.clone()),
        );
    }
}

/// Runs one job under `ctx`.
///
/// The context is checked before the job starts, and the job is dropped at its
/// next suspension point once the context ends. Panics are caught and
/// reported as [`ParallelError::JobPanicked`].
async fn run_job<Out, E, C>(ctx: JobContext, call: C) -> Result<Out, ParallelError<E>>
where
    C: FnOnce(JobContext) -> JobFuture<Out, E>,
    E: Display,
{
    ctx.check()?;

    let job_ctx = ctx.clone();
    let job = AssertUnwindSafe(async move { call(job_ctx).await }).catch_unwind();

    tokio::select! {
        biased;
        _ = ctx.done() => Err(context_failure(&ctx)),
        outcome = job => match outcome {
            Ok(Ok(value)) => {
                debug!("job succeeded");
                Ok(value)
            }
            Ok(Err(err)) => {
                debug!(error = %err, "job failed");
                Err(ParallelError::Job(err))
            }
            Err(payload) => {
                let err = ParallelError::from_panic(payload);
                warn!(error = %err, "job panicked");
                Err(err)
            }
        },
    }
}

fn context_failure<E>(ctx: &JobContext) -> ParallelError<E> {
    ctx.err().unwrap_or(ContextError::Cancelled).into()
}
