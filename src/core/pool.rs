use crate::utils::error::{PlatformError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Fixed number of workers pulling jobs from one FIFO queue. With a single
/// worker, jobs run one at a time in submission order.
///
/// Dropping the pool closes the queue; workers still finish every job that
/// was already queued before they exit.
pub struct WorkerPool {
    workers: usize,
    sender: mpsc::UnboundedSender<Job>,
    // Held until the first submission starts the workers.
    receiver: Option<mpsc::UnboundedReceiver<Job>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            workers: workers.max(1),
            sender,
            receiver: Some(receiver),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queues `job`. Must be called from within a Tokio runtime.
    pub fn submit(&mut self, job: Job) -> Result<()> {
        if let Some(receiver) = self.receiver.take() {
            self.start(receiver);
        }
        self.sender
            .send(job)
            .map_err(|_| PlatformError::ExecutionFailure {
                message: "worker pool has shut down".to_string(),
            })
    }

    fn start(&self, receiver: mpsc::UnboundedReceiver<Job>) {
        tracing::debug!("Starting worker pool with {} workers", self.workers);
        let queue = Arc::new(Mutex::new(receiver));

        for worker in 0..self.workers {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                loop {
                    let job = queue.lock().await.recv().await;
                    let Some(job) = job else { break };
                    // A panicking job must not take the worker down with it.
                    if let Err(e) = tokio::spawn(job).await {
                        tracing::error!("Worker {} job failed: {}", worker, e);
                    }
                }
                tracing::debug!("Worker {} stopped", worker);
            });
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("started", &self.receiver.is_none())
            .finish()
    }
}
