//! Task runtime abstraction
//!
//! The orchestrator dispatches one unit of work per document. Delivery is
//! at-least-once, so every unit must be idempotent.

pub mod local;

use crate::domain::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;

pub use local::LocalTaskRuntime;

/// A dispatched unit of work
pub type TaskFuture = BoxFuture<'static, ()>;

/// Runtime executing dispatched units of work
#[async_trait]
pub trait TaskRuntime: Send + Sync {
    /// Submits a unit of work keyed by the document it operates on
    ///
    /// Returns once the task is accepted, not once it has run.
    async fn submit(&self, key: String, task: TaskFuture) -> Result<()>;

    /// Number of accepted tasks that have not finished
    async fn pending(&self) -> Result<usize>;
}
