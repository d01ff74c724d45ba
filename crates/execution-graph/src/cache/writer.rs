//! Background cache writer pool.
//!
//! Cache writes run off the request path on a fixed number of worker tasks
//! fed by a bounded queue. When the queue is full new writes are dropped:
//! the next request rebuilds whatever was lost.

use crate::error::Result;
use crate::events::{emit, GraphEvent, GraphEventSink};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Boxed write operation run by a worker.
pub type WriteTask = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

struct WriteJob {
    label: String,
    task: WriteTask,
}

/// Fixed-size pool of cache writer tasks.
///
/// Must be created inside a Tokio runtime.
pub struct CacheWriter {
    sender: mpsc::Sender<WriteJob>,
    pending: Arc<watch::Sender<usize>>,
    workers: Vec<JoinHandle<()>>,
    events: Arc<dyn GraphEventSink>,
}

impl CacheWriter {
    pub fn new(workers: usize, capacity: usize, events: Arc<dyn GraphEventSink>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    receiver.clone(),
                    pending.clone(),
                    events.clone(),
                ))
            })
            .collect();

        Self {
            sender,
            pending,
            workers,
            events,
        }
    }

    /// Queue a write. Returns `false` if it was dropped.
    pub fn submit<F>(&self, label: impl Into<String>, task: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let label = label.into();
        self.pending.send_modify(|n| *n += 1);
        let job = WriteJob {
            label: label.clone(),
            task: Box::pin(task),
        };

        match self.sender.try_send(job) {
            Ok(()) => {
                emit(self.events.as_ref(), GraphEvent::CacheWriteQueued { label });
                true
            }
            Err(e) => {
                self.pending.send_modify(|n| *n = n.saturating_sub(1));
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "writer closed",
                };
                log::warn!("Dropping cache write '{}': {}", label, reason);
                emit(
                    self.events.as_ref(),
                    GraphEvent::CacheWriteDropped {
                        label,
                        reason: reason.to_string(),
                    },
                );
                false
            }
        }
    }

    /// Writes queued or running.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until every accepted write has finished.
    pub async fn flush(&self) {
        let mut pending = self.pending.subscribe();
        let _ = pending.wait_for(|n| *n == 0).await;
    }

    /// Stop accepting writes, drain the queue and join the workers.
    pub async fn shutdown(self) {
        let CacheWriter {
            sender, workers, ..
        } = self;
        drop(sender);
        for worker in workers {
            if let Err(e) = worker.await {
                log::error!("Cache writer task ended abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<WriteJob>>>,
    pending: Arc<watch::Sender<usize>>,
    events: Arc<dyn GraphEventSink>,
) {
    log::debug!("Cache writer {} started", worker_id);
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(WriteJob { label, task }) = job else {
            break;
        };

        // Own task so a panicking write cannot take the worker down.
        let error = match tokio::spawn(task).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(error) = error {
            log::error!("Cache write '{}' failed: {}", label, error);
            emit(events.as_ref(), GraphEvent::CacheWriteFailed { label, error });
        }

        pending.send_modify(|n| *n = n.saturating_sub(1));
    }
    log::debug!("Cache writer {} stopped", worker_id);
}
