use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::Instrument;

use super::orchestrator::Orchestrator;
use crate::errors::QueueError;
use crate::queue::{QueueHandle, Task};

pub const SHUTDOWN_ERROR: &str = "interrupted by shutdown";

/// Polls the queue and processes one task at a time.
pub struct Worker {
    queue: QueueHandle,
    orchestrator: Arc<Orchestrator>,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

impl Worker {
    pub fn new(queue: QueueHandle, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            queue,
            orchestrator,
            poll_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(30),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Dequeue and process at most one task. Returns whether a task was taken.
    ///
    /// A failing task is recorded in the queue and is not an error here;
    /// only queue I/O failures are returned.
    pub async fn run_once(&self) -> Result<bool, QueueError> {
        match self.queue.get_next_task().await? {
            Some(task) => {
                self.process(task).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process(&self, task: Task) -> Result<(), QueueError> {
        let span = tracing::info_span!("task", task_id = %task.id);
        async {
            tracing::info!(description = %task.description, "Dequeued task");
            match self.orchestrator.process_task(&task).await {
                Ok(result) => {
                    self.queue.complete_task(task.id.clone(), result).await?;
                    tracing::info!("Task moved to completed");
                }
                Err(e) => {
                    self.queue.fail_task(task.id.clone(), e.to_string()).await?;
                    tracing::warn!(error = %e, "Task moved to failed");
                }
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Poll until `shutdown` flips to true (or its sender is dropped).
    ///
    /// A task in flight when shutdown is requested gets the grace period to
    /// finish; after that it is abandoned and moved to `failed` so it can be
    /// retried.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_secs = self.poll_interval.as_secs_f64(),
            "Worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.queue.get_next_task().await {
                Ok(Some(task)) => {
                    let task_id = task.id.clone();
                    let mut work = Box::pin(self.process(task));
                    tokio::select! {
                        res = &mut work => {
                            if let Err(e) = res {
                                tracing::error!(task_id = %task_id, error = %e, "Failed to record task outcome");
                            }
                            // Look for more work right away.
                            continue;
                        }
                        _ = shutdown.changed() => {
                            tracing::info!(
                                task_id = %task_id,
                                grace_secs = self.shutdown_grace.as_secs_f64(),
                                "Shutdown requested, waiting for in-flight task"
                            );
                            match tokio::time::timeout(self.shutdown_grace, &mut work).await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => {
                                    tracing::error!(task_id = %task_id, error = %e, "Failed to record task outcome");
                                }
                                Err(_) => {
                                    drop(work);
                                    tracing::warn!(task_id = %task_id, "Grace period expired, abandoning task");
                                    self.orchestrator
                                        .statuses()
                                        .fail(&task_id, SHUTDOWN_ERROR)
                                        .await;
                                    if let Err(e) = self
                                        .queue
                                        .fail_task(task_id.clone(), SHUTDOWN_ERROR.to_string())
                                        .await
                                    {
                                        tracing::error!(task_id = %task_id, error = %e, "Failed to record abandoned task");
                                    }
                                }
                            }
                            break;
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to poll queue");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Worker stopped");
    }
}
