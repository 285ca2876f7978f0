//! This module provides background task pooling features.
//!
//! The pool backs the content index: the initial-scan identifier computations
//! run on it, and so does the long-lived filesystem event routine. Tasks are
//! plain boxed futures fanned out to a fixed number of workers over an
//! unbounded _multi-producer single-consumer_ channel.

use std::num::NonZeroU8;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{self, Future, FutureExt};
use tokio::sync::{mpsc, Mutex};

pub use future::{AbortHandle, Aborted, RemoteHandle};

type Task = future::BoxFuture<'static, ()>;

/// A pool of workers processing asynchronous tasks in the background.
///
/// Tasks can be pushed fire-and-forget with [`Pool::forget()`], or with
/// [`Pool::execute()`] to keep a remote handle on the task result together
/// with an abort handle to cancel it. Stopping the pool waits for all pending
/// tasks to complete.
#[derive(Debug, Default)]
pub struct Pool {
    /// The pool of workers.
    workers: Vec<Worker>,
    /// The sending part of the channel pushing tasks to the workers.
    sender: Option<mpsc::UnboundedSender<Task>>,
}

impl Pool {
    /// Start a pool with `size` workers.
    ///
    /// _Note: a task sent to a pool that is not started is just lost without
    /// executing anything._
    ///
    /// # Panics
    /// This method panics if the pool is already running, ie. when called more
    /// than once without stopping the pool in between.
    pub fn start(&mut self, size: NonZeroU8) {
        assert!(self.sender.is_none() && self.workers.is_empty());

        let (sender, receiver) = mpsc::unbounded_channel();

        let receiver = Arc::new(Mutex::new(receiver));

        static WORKER_ID: AtomicUsize = AtomicUsize::new(0);
        let size = size.get().into();
        let id = WORKER_ID.fetch_add(size, Ordering::Relaxed);

        self.workers = (0..size).map(|i| Worker::new(id.wrapping_add(i), Arc::clone(&receiver))).collect();
        self.sender = Some(sender);
    }

    /// Send a task and keep remote and abort handles on it.
    ///
    /// The remote handle resolves to the task result on completion, or to
    /// `Err(Aborted)` once `abort_handle.abort()` has been called.
    ///
    /// **Be aware that just dropping the remote handle automatically cancels
    /// the task**; call `RemoteHandle::forget()` to let it run detached.
    pub fn execute<T: Send>(&self, future: impl Future<Output = T> + Send + 'static) -> (RemoteHandle<Result<T, Aborted>>, AbortHandle) {
        let (abortable, abort_handle) = future::abortable(future);
        let (remote, remote_handle) = abortable.remote_handle();

        self.forget(remote);

        (remote_handle, abort_handle)
    }

    /// Send a task and forget it.
    #[inline]
    pub fn forget(&self, future: impl Future<Output = ()> + Send + 'static) {
        if let Some(ref sender) = self.sender {
            sender.send(future.boxed()).unwrap();
        }
    }

    /// Stop the current pool of workers, waiting for all pending tasks to complete.
    ///
    /// Once stopped, the pool can be started again with any number of workers.
    pub async fn stop(&mut self) {
        let _ = self.sender.take().as_ref().map(mpsc::UnboundedSender::downgrade);
        let workers = std::mem::take(&mut self.workers);

        future::join_all(workers.into_iter().inspect(|worker| {
            tracing::debug!("Stopping worker {}...", worker.id);
        }))
        .await;
    }

    /// Close the current pool of workers, waiting for all pending tasks to complete.
    ///
    /// Once closed, the pool cannot be used since it is consumed.
    pub async fn close(mut self) {
        self.stop().await
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    handle: tokio::task::JoinHandle<()>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>) -> Worker {
        tracing::debug!("Starting worker {id}...");

        Worker {
            id,
            handle: tokio::spawn(async move {
                loop {
                    let message = receiver.lock().await.recv().await;

                    match message {
                        Some(task) => {
                            tracing::debug!("Executing task on worker {id}...");

                            task.await;
                        }
                        None => {
                            tracing::debug!("All tasks exhausted, shutting down worker {id}.");
                            break;
                        }
                    }
                }
            }),
        }
    }
}

impl Future for Worker {
    type Output = Result<(), tokio::task::JoinError>;

    #[inline]
    fn poll(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
        self.handle.poll_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_pool_executes_and_drains() {
        let mut pool = Pool::default();
        pool.start(2.try_into().unwrap());

        let (remote_handle, _) = pool.execute(async { 40 + 2 });
        assert_eq!(remote_handle.await, Ok(42));

        let flag = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&flag);
        pool.forget(async move { seen.store(true, Ordering::Release) });

        pool.close().await;
        assert!(flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_pool_aborts_task() {
        let mut pool = Pool::default();
        pool.start(1.try_into().unwrap());

        let (remote_handle, abort_handle) = pool.execute(future::pending::<()>());
        abort_handle.abort();

        assert_eq!(remote_handle.await, Err(Aborted));

        pool.close().await;
    }
}
