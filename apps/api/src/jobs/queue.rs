//! Background task dispatch over a Redis list.
//!
//! Producers `LPUSH` onto the queue. Each worker `BLMOVE`s one task at a time
//! into its own processing list and removes it only after the task finished,
//! so a crashed worker's task is put back on the queue when it restarts.
//! Delivery is at-least-once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Task encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Work a worker can be asked to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Full pipeline followed by conversion.
    GenerateAndConvert { job_id: Uuid },
    /// Re-assemble the artifact from the stored slide markup.
    Convert { job_id: Uuid },
    RegenerateSlides {
        job_id: Uuid,
        slide_numbers: Vec<usize>,
        instructions: String,
    },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::GenerateAndConvert { .. } => "generate_and_convert",
            Task::Convert { .. } => "convert",
            Task::RegenerateSlides { .. } => "regenerate_slides",
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            Task::GenerateAndConvert { job_id }
            | Task::Convert { job_id }
            | Task::RegenerateSlides { job_id, .. } => *job_id,
        }
    }
}

/// What actually sits on the list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: Uuid,
    #[serde(flatten)]
    pub task: Task,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(task: Task) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            enqueued_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Returns the handle of the queued task.
    async fn enqueue(&self, task: Task) -> Result<Uuid, QueueError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Redis
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RedisQueue {
    client: redis::Client,
    name: String,
}

impl RedisQueue {
    pub fn new(client: redis::Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    fn processing_list(&self, worker_id: &str) -> String {
        format!("{}:processing:{}", self.name, worker_id)
    }

    /// Opens a dedicated connection for one worker. Blocking pops would stall
    /// any other command sharing the connection.
    pub async fn consumer(&self, worker_id: &str) -> Result<RedisConsumer, QueueError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(RedisConsumer {
            conn,
            queue: self.name.clone(),
            processing: self.processing_list(worker_id),
        })
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn enqueue(&self, task: Task) -> Result<Uuid, QueueError> {
        let envelope = TaskEnvelope::new(task);
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.lpush::<_, _, ()>(&self.name, payload).await?;
        info!(
            "Queued {} task {} for job {}",
            envelope.task.name(),
            envelope.id,
            envelope.task.job_id()
        );
        Ok(envelope.id)
    }
}

/// A task taken off the queue. Must be acked once handled.
#[derive(Debug)]
pub struct Delivery {
    payload: String,
}

impl Delivery {
    pub fn decode(&self) -> Result<TaskEnvelope, QueueError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

pub struct RedisConsumer {
    conn: MultiplexedConnection,
    queue: String,
    processing: String,
}

impl RedisConsumer {
    /// Puts tasks left in this worker's processing list back on the queue,
    /// oldest first.
    pub async fn recover(&mut self) -> Result<usize, QueueError> {
        let mut recovered = 0;
        loop {
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(&self.processing)
                .arg(&self.queue)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut self.conn)
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }
        if recovered > 0 {
            warn!(
                "Recovered {} unacknowledged tasks from {}",
                recovered, self.processing
            );
        }
        Ok(recovered)
    }

    /// Waits up to `timeout_secs` for the next task.
    pub async fn next(&mut self, timeout_secs: f64) -> Result<Option<Delivery>, QueueError> {
        let payload: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.queue)
            .arg(&self.processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout_secs)
            .query_async(&mut self.conn)
            .await?;
        Ok(payload.map(|payload| Delivery { payload }))
    }

    pub async fn ack(&mut self, delivery: &Delivery) -> Result<(), QueueError> {
        let removed: i64 = self.conn.lrem(&self.processing, 1, &delivery.payload).await?;
        debug!("Acked delivery ({} removed)", removed);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory (tests)
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[derive(Default)]
pub struct MemoryQueue {
    pub tasks: tokio::sync::Mutex<Vec<TaskEnvelope>>,
    pub refuse: bool,
}

#[cfg(test)]
#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, task: Task) -> Result<Uuid, QueueError> {
        if self.refuse {
            return Err(QueueError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            ))));
        }
        let envelope = TaskEnvelope::new(task);
        let id = envelope.id;
        self.tasks.lock().await.push(envelope);
        Ok(id)
    }
}
