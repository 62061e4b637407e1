//! Job types and job collections.
//!
//! A [`Job`] is an async callable `(JobContext, In) -> Result<Out, E>`.
//! A [`BasicJob`] is the fire-and-forget variant `JobContext -> Result<(), E>`
//! used by [`JobController::do_all`](crate::JobController::do_all).
//!
//! Both are cheap to clone and hold no per-batch state.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::context::JobContext;
use crate::error::BoxError;

/// The boxed future produced by one job invocation.
pub type JobFuture<Out, E> = BoxFuture<'static, Result<Out, E>>;

/// A stateful job implementation.
///
/// Implement this for types that carry their own resources (clients, pools)
/// and adapt them with [`Job::from_handler`].
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use parallel_jobs::{BoxError, Job, JobContext, JobHandler};
/// use std::sync::Arc;
///
/// struct Doubler;
///
/// #[async_trait]
/// impl JobHandler<u32, u32> for Doubler {
///     async fn handle(&self, ctx: JobContext, input: u32) -> Result<u32, BoxError> {
///         ctx.check()?;
///         Ok(input * 2)
///     }
/// }
///
/// let job: Job<u32, u32> = Job::from_handler(Arc::new(Doubler));
/// ```
#[async_trait]
pub trait JobHandler<In, Out, E = BoxError>: Send + Sync {
    /// Runs the job once for `input`.
    async fn handle(&self, ctx: JobContext, input: In) -> Result<Out, E>;
}

/// A unit of work taking a context and an input.
pub struct Job<In, Out, E = BoxError> {
    run: Arc<dyn Fn(JobContext, In) -> JobFuture<Out, E> + Send + Sync>,
}

impl<In, Out, E> Job<In, Out, E> {
    /// Wraps an async closure.
    ///
    /// # Examples
    ///
    /// ```
    /// use parallel_jobs::{BoxError, Job};
    ///
    /// let upper: Job<String, String> =
    ///     Job::new(|_ctx, s: String| async move { Ok::<_, BoxError>(s.to_uppercase()) });
    /// ```
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(JobContext, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
    {
        Self {
            run: Arc::new(move |ctx, input| f(ctx, input).boxed()),
        }
    }

    /// Adapts a [`JobHandler`].
    pub fn from_handler<H>(handler: Arc<H>) -> Self
    where
        H: JobHandler<In, Out, E> + 'static,
        In: Send + 'static,
        Out: 'static,
        E: 'static,
    {
        Self::new(move |ctx, input| {
            let handler = Arc::clone(&handler);
            async move { handler.handle(ctx, input).await }
        })
    }

    /// Starts one invocation.
    pub fn call(&self, ctx: JobContext, input: In) -> JobFuture<Out, E> {
        (self.run)(ctx, input)
    }
}

impl<In, Out, E> Clone for Job<In, Out, E> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
        }
    }
}

impl<In, Out, E> fmt::Debug for Job<In, Out, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}

/// A unit of work that only reports success or failure.
pub struct BasicJob<E = BoxError> {
    run: Arc<dyn Fn(JobContext) -> JobFuture<(), E> + Send + Sync>,
}

impl<E> BasicJob<E> {
    /// Wraps an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        Self {
            run: Arc::new(move |ctx| f(ctx).boxed()),
        }
    }

    /// Starts one invocation.
    pub fn call(&self, ctx: JobContext) -> JobFuture<(), E> {
        (self.run)(ctx)
    }
}

impl<E> Clone for BasicJob<E> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
        }
    }
}

impl<E> fmt::Debug for BasicJob<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicJob").finish_non_exhaustive()
    }
}

/// An ordered batch of [`Job`]s.
pub struct Jobs<In, Out, E = BoxError> {
    jobs: Vec<Job<In, Out, E>>,
}

impl<In, Out, E> Jobs<In, Out, E> {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    /// Appends a job, returning `self` for chaining.
    pub fn add(&mut self, job: Job<In, Out, E>) -> &mut Self {
        self.jobs.push(job);
        self
    }

    /// Number of jobs in the batch.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns `true` if no job has been added.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl<In, Out, E> Default for Jobs<In, Out, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In, Out, E> Clone for Jobs<In, Out, E> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
        }
    }
}

impl<In, Out, E> fmt::Debug for Jobs<In, Out, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jobs").field("len", &self.jobs.len()).finish()
    }
}

impl<In, Out, E> Extend<Job<In, Out, E>> for Jobs<In, Out, E> {
    fn extend<T: IntoIterator<Item = Job<In, Out, E>>>(&mut self, iter: T) {
        self.jobs.extend(iter);
    }
}

impl<In, Out, E> FromIterator<Job<In, Out, E>> for Jobs<In, Out, E> {
    fn from_iter<T: IntoIterator<Item = Job<In, Out, E>>>(iter: T) -> Self {
        Self {
            jobs: iter.into_iter().collect(),
        }
    }
}

impl<In, Out, E> IntoIterator for Jobs<In, Out, E> {
    type Item = Job<In, Out, E>;
    type IntoIter = std::vec::IntoIter<Job<In, Out, E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.into_iter()
    }
}

/// An ordered batch of [`BasicJob`]s.
pub struct BasicJobs<E = BoxError> {
    jobs: Vec<BasicJob<E>>,
}

impl<E> BasicJobs<E> {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    /// Appends a job, returning `self` for chaining.
    pub fn add(&mut self, job: BasicJob<E>) -> &mut Self {
        self.jobs.push(job);
        self
    }

    /// Number of jobs in the batch.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns `true` if no job has been added.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl<E> Default for BasicJobs<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for BasicJobs<E> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
        }
    }
}

impl<E> fmt::Debug for BasicJobs<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicJobs")
            .field("len", &self.jobs.len())
            .finish()
    }
}

impl<E> Extend<BasicJob<E>> for BasicJobs<E> {
    fn extend<T: IntoIterator<Item = BasicJob<E>>>(&mut self, iter: T) {
        self.jobs.extend(iter);
    }
}

impl<E> FromIterator<BasicJob<E>> for BasicJobs<E> {
    fn from_iter<T: IntoIterator<Item = BasicJob<E>>>(iter: T) -> Self {
        Self {
            jobs: iter.into_iter().collect(),
        }
    }
}

impl<E> IntoIterator for BasicJobs<E> {
    type Item = BasicJob<E>;
    type IntoIter = std::vec::IntoIter<BasicJob<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Offset(u32);

    #[async_trait]
    impl JobHandler<u32, u32> for Offset {
        async fn handle(&self, ctx: JobContext, input: u32) -> Result<u32, BoxError> {
            ctx.check()?;
            Ok(input + self.0)
        }
    }

    #[tokio::test]
    async fn test_job_call() {
        let job: Job<&'static str, String> =
            Job::new(|_ctx, v| async move { Ok(format!("_{v}")) });

        let out = job.call(JobContext::new(), "a").await.unwrap();
        assert_eq!(out, "_a");
    }

    #[tokio::test]
    async fn test_job_from_handler() {
        let job: Job<u32, u32> = Job::from_handler(Arc::new(Offset(10)));
        assert_eq!(job.call(JobContext::new(), 5).await.unwrap(), 15);

        let ctx = JobContext::new();
        ctx.cancel();
        let err = job.call(ctx, 5).await.unwrap_err();
        assert_eq!(err.to_string(), "context cancelled");
    }

    #[tokio::test]
    async fn test_basic_job_clone_shares_closure() {
        let count = Arc::new(AtomicUsize::new(0));
        let job: BasicJob = {
            let count = Arc::clone(&count);
            BasicJob::new(move |_ctx| {
                count.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
        };
        let copy = job.clone();

        job.call(JobContext::new()).await.unwrap();
        copy.call(JobContext::new()).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_jobs_add_chains() {
        let job: Job<u32, u32> = Job::new(|_ctx, v| async move { Ok(v) });
        let mut jobs = Jobs::new();
        jobs.add(job.clone()).add(job.clone()).add(job);

        assert_eq!(jobs.len(), 3);
        assert!(!jobs.is_empty());
        assert_eq!(jobs.into_iter().count(), 3);
    }

    #[test]
    fn test_basic_jobs_collect_and_extend() {
        let job: BasicJob = BasicJob::new(|_ctx| async { Ok(()) });
        let mut jobs: BasicJobs = std::iter::repeat_n(job.clone(), 2).collect();
        jobs.extend([job]);

        assert_eq!(jobs.len(), 3);
        assert!(BasicJobs::<BoxError>::default().is_empty());
        assert!(format!("{:?}", jobs).contains("len: 3"));
    }
}
