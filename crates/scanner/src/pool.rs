//! Bounded worker pool.
//!
//! [`WorkerPool::hire`] waits for a free slot and hands out a [`Worker`]
//! guard. The slot is released when the guard is dropped, so a task that
//! fails or panics cannot leak it. [`WorkerPool::wait`] is the drain barrier:
//! it returns once every worker hired so far has been released.

use crate::error::{Result, ScanError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;

/// Limits the number of concurrently running tasks.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    limit: usize,
}

/// A hired slot in a [`WorkerPool`]. Dropping it releases the slot.
#[derive(Debug)]
pub struct Worker {
    _permit: OwnedSemaphorePermit,
    _token: TaskTrackerToken,
}

impl WorkerPool {
    /// Create a pool running at most `limit` tasks at once.
    ///
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            slots: Arc::new(Semaphore::new(limit)),
            tracker: TaskTracker::new(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of hired workers that have not been released yet.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for a free slot and mark one task as started.
    pub async fn hire(&self) -> Result<Worker> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ScanError::PoolClosed)?;
        Ok(Worker {
            _permit: permit,
            _token: self.tracker.token(),
        })
    }

    /// Hire a worker and run `task` on the runtime while holding it.
    pub async fn spawn<F>(&self, task: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let worker = self.hire().await?;
        Ok(tokio::spawn(async move {
            let _worker = worker;
            task.await
        }))
    }

    /// Wait until every hired worker has been released.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
