//! Running coordinator work on the worker-thread processor.
//!
//! The coordinator stays on the async runtime; blocking work is pushed into
//! the [`TaskProcessor`] queue and its result comes back over a oneshot
//! channel. Neither side holds its own lock while talking to the other.
//!
//! Stopping the processor drops queued jobs, which closes their channels, so
//! an operation waiting on a job that will never run fails instead of
//! hanging.

use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::coordinator::{ExecutionContext, TaskOperation};
use crate::core::{AppResult, CoreError, Priority, TaskProcessor};

type BlockingWork = dyn Fn(&ExecutionContext) -> AppResult<serde_json::Value> + Send + Sync;

/// A [`TaskOperation`] that runs a blocking closure on processor threads.
pub struct ProcessorOperation {
    processor: Arc<TaskProcessor>,
    priority: Priority,
    work: Arc<BlockingWork>,
}

impl fmt::Debug for ProcessorOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorOperation")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl ProcessorOperation {
    /// Wrap `work` to run on `processor` at `priority`.
    pub fn new<F>(processor: Arc<TaskProcessor>, priority: Priority, work: F) -> Self
    where
        F: Fn(&ExecutionContext) -> AppResult<serde_json::Value> + Send + Sync + 'static,
    {
        Self {
            processor,
            priority,
            work: Arc::new(work),
        }
    }
}

#[async_trait]
impl TaskOperation for ProcessorOperation {
    async fn execute(&self, ctx: ExecutionContext) -> anyhow::Result<serde_json::Value> {
        if !self.processor.is_running() {
            return Err(CoreError::ProcessorStopped.into());
        }
        let (tx, rx) = oneshot::channel();
        let work = Arc::clone(&self.work);
        let queue_id = format!("{}#{}", ctx.task_id, ctx.attempt);

        let job = move || -> AppResult<()> {
            match work(&ctx) {
                Ok(output) => {
                    let _ = tx.send(Ok(output));
                    Ok(())
                }
                Err(e) => {
                    // keep the processor's failure counter honest too
                    let message = format!("{e:#}");
                    let _ = tx.send(Err(e));
                    Err(anyhow!(message))
                }
            }
        };
        self.processor
            .submit(Box::new(job), self.priority, Some(queue_id))?;

        rx.await
            .map_err(|_| anyhow!(CoreError::ProcessorStopped).context("job dropped before it ran"))?
    }
}
