//! Unit-of-work abstraction for the priority processor.

use std::fmt;

use crate::core::AppResult;

/// A unit of work executed by a worker thread.
///
/// Callers build the job (capturing whatever arguments it needs) before
/// enqueueing it; the worker only ever calls [`Job::execute`] once.
///
/// # Example
///
/// ```rust
/// use prometheus_task_core::core::{BoxedJob, Job};
///
/// let job: BoxedJob = Box::new(|| -> anyhow::Result<()> {
///     println!("hello from a worker");
///     Ok(())
/// });
/// job.execute().unwrap();
/// ```
pub trait Job: Send + 'static {
    /// Run the job, consuming it.
    ///
    /// # Errors
    ///
    /// Any error is logged by the worker and counted as a failed task.
    fn execute(self: Box<Self>) -> AppResult<()>;
}

/// Blanket implementation: any `FnOnce() -> Result<(), E>` closure is a job.
impl<F, E> Job for F
where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: Into<anyhow::Error>,
{
    fn execute(self: Box<Self>) -> AppResult<()> {
        (*self)().map_err(Into::into)
    }
}

/// Owned, type-erased job as stored in the queue.
pub type BoxedJob = Box<dyn Job>;

/// Adapter for infallible closures.
pub struct FnJob<F>(pub F);

impl<F> fmt::Debug for FnJob<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnJob")
    }
}

impl<F> Job for FnJob<F>
where
    F: FnOnce() + Send + 'static,
{
    fn execute(self: Box<Self>) -> AppResult<()> {
        (self.0)();
        Ok(())
    }
}
