//! FIFO serializer for chain mutations.
//!
//! Jobs are boxed futures executed one at a time by a single worker task in
//! submission order. A job runs to completion even if its submitter stops
//! waiting for the result.

use crate::{ChainError, ChainResult};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

type Job = BoxFuture<'static, ()>;
type ReadyCallback = Box<dyn Fn() + Send + Sync>;

pub struct MutationQueue {
    jobs_tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl MutationQueue {
    /// Spawn the worker. `on_ready` runs each time the last queued job
    /// finishes. Must be called inside a tokio runtime.
    pub fn new(on_ready: ReadyCallback) -> Self {
        let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(job) = jobs_rx.recv().await {
                job.await;
                if worker_pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    trace!("Mutation queue drained");
                    on_ready();
                }
            }
            debug!("Mutation queue worker stopped");
        });

        Self { jobs_tx, pending }
    }

    /// Queue `job` and wait for its output.
    pub async fn push<F, T>(&self, job: F) -> ChainResult<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let wrapped: Job = Box::pin(async move {
            let _ = reply_tx.send(job.await);
        });

        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.jobs_tx.send(wrapped).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(ChainError::QueueClosed);
        }
        reply_rx.await.map_err(|_| ChainError::QueueClosed)
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationQueue")
            .field("pending", &self.pending())
            .finish()
    }
}
