//! The async work a coordinator task performs.

use std::future::Future;

use async_trait::async_trait;

use crate::coordinator::ExecutionContext;

/// Async unit of work attached to a [`Task`](crate::coordinator::Task).
///
/// The same operation may be invoked again on retry, so implementations take
/// `&self` and must not assume a single call.
#[async_trait]
pub trait TaskOperation: Send + Sync {
    /// Run the operation.
    ///
    /// # Errors
    ///
    /// Any error marks the attempt as failed; the coordinator decides whether
    /// to retry.
    async fn execute(&self, ctx: ExecutionContext) -> anyhow::Result<serde_json::Value>;
}

#[async_trait]
impl<F, Fut> TaskOperation for F
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    async fn execute(&self, ctx: ExecutionContext) -> anyhow::Result<serde_json::Value> {
        self(ctx).await
    }
}
