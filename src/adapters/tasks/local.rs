//! In-process task runtime
//!
//! Runs dispatched tasks on the tokio runtime with a semaphore bounding how many
//! execute at once. Accepted tasks count as pending from submission until they
//! finish or panic.

use super::{TaskFuture, TaskRuntime};
use crate::domain::{LineageError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Tokio-backed [`TaskRuntime`]
pub struct LocalTaskRuntime {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    closed: AtomicBool,
}

/// Decrements the in-flight counter when the task ends, including on panic
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LocalTaskRuntime {
    /// Creates a runtime running at most `concurrency` tasks at once
    pub fn new(concurrency: usize) -> Self {
        tracing::debug!(concurrency, "Starting local task runtime");
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            in_flight: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    /// Stops accepting new tasks; accepted tasks still run
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskRuntime for LocalTaskRuntime {
    async fn submit(&self, key: String, task: TaskFuture) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LineageError::Task(format!(
                "runtime closed, task {key} rejected"
            )));
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let semaphore = Arc::clone(&self.semaphore);

        tokio::spawn(async move {
            let _guard = guard;
            let Ok(_permit) = semaphore.acquire_owned().await else {
                tracing::error!(task = %key, "Task semaphore closed");
                return;
            };
            tracing::trace!(task = %key, "Running task");
            task.await;
        });
        Ok(())
    }

    async fn pending(&self) -> Result<usize> {
        Ok(self.in_flight.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tasks_run_and_drain() {
        let runtime = LocalTaskRuntime::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            let counter = Arc::clone(&counter);
            runtime
                .submit(
                    format!("task-{i}"),
                    async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    .boxed(),
                )
                .await
                .unwrap();
        }

        for _ in 0..200 {
            if runtime.pending().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runtime.pending().await.unwrap(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_closed_runtime_rejects() {
        let runtime = LocalTaskRuntime::new(1);
        runtime.close();
        let result = runtime.submit("x".to_string(), async {}.boxed()).await;
        assert!(matches!(result, Err(LineageError::Task(_))));
    }

    #[tokio::test]
    async fn test_panicking_task_is_not_pending() {
        let runtime = LocalTaskRuntime::new(1);
        runtime
            .submit("boom".to_string(), async { panic!("boom"); }.boxed())
            .await
            .unwrap();

        for _ in 0..100 {
            if runtime.pending().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runtime.pending().await.unwrap(), 0);
    }
}
