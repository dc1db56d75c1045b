//! Queue consumer. Takes one task at a time and exits after `max_jobs` tasks
//! so the supervisor can start a fresh process.

use tracing::{error, info, warn};

use super::queue::{QueueError, RedisQueue};
use super::tasks::TaskRunner;
use crate::errors::PipelineError;

/// Seconds one blocking pop waits before the loop polls again.
const POLL_TIMEOUT_SECS: f64 = 5.0;

pub struct Worker {
    id: String,
    queue: RedisQueue,
    runner: TaskRunner,
    max_jobs: usize,
}

impl Worker {
    pub fn new(id: impl Into<String>, queue: RedisQueue, runner: TaskRunner, max_jobs: usize) -> Self {
        Self {
            id: id.into(),
            queue,
            runner,
            max_jobs: max_jobs.max(1),
        }
    }

    /// Runs until `max_jobs` tasks were handled. Returns the count.
    pub async fn run(&self) -> Result<usize, QueueError> {
        let mut consumer = self.queue.consumer(&self.id).await?;
        consumer.recover().await?;
        info!("Worker {} ready (recycles after {} tasks)", self.id, self.max_jobs);

        let mut handled = 0;
        while handled < self.max_jobs {
            let Some(delivery) = consumer.next(POLL_TIMEOUT_SECS).await? else {
                continue;
            };

            match delivery.decode() {
                Ok(envelope) => {
                    let task = &envelope.task;
                    info!(
                        "Worker {}: {} task {} for job {}",
                        self.id,
                        task.name(),
                        envelope.id,
                        task.job_id()
                    );
                    match self.runner.run(task).await {
                        Ok(()) => info!("Task {} done", envelope.id),
                        Err(PipelineError::Cancelled) => {
                            info!("Task {} stopped: job {} was cancelled", envelope.id, task.job_id())
                        }
                        Err(e) => error!("Task {} failed: {}", envelope.id, e),
                    }
                }
                Err(e) => warn!("Dropping malformed task: {}", e),
            }

            consumer.ack(&delivery).await?;
            handled += 1;
        }

        info!("Worker {} handled {} tasks, recycling", self.id, handled);
        Ok(handled)
    }
}
