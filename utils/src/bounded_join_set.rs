use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinError, JoinSet};

/// A `JoinSet` where at most `max_concurrent` tasks make progress at once.
///
/// Every task is spawned immediately but waits on a shared semaphore before running its body, so
/// tasks start in roughly submission order and never more than `max_concurrent` run together.
/// Dropping the set aborts every task still in it.
pub struct BoundedJoinSet<T> {
    inner: JoinSet<T>,
    semaphore: Arc<Semaphore>,
}

impl<T: Send + 'static> BoundedJoinSet<T> {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: JoinSet::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn spawn<F>(&mut self, task: F) -> AbortHandle
    where
        F: Future<Output = T> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        self.inner.spawn(async move {
            // The semaphore is never closed, so acquire only fails if it is dropped with us.
            let _permit = semaphore.acquire_owned().await;
            task.await
        })
    }

    pub async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
        self.inner.join_next().await
    }

    pub fn abort_all(&mut self) {
        self.inner.abort_all();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
