//! Topic-keyed buffer queues
//!
//! A buffer queue holds inbound messages between their arrival from the transport client
//! and their dequeue by a producer. Queues are owned by a [`QueueSupervisor`], never by a
//! producer, so messages that were buffered but not yet delivered survive a producer
//! restart. Producers and transport clients only ever hold a [`QueueName`] and resolve it
//! through the supervisor when they need the queue.
//!
//! ```text
//!   Transport Client ──enqueue──▶ ┌──────────────────────┐
//!                                 │  QueueSupervisor     │
//!                                 │  registry:topic ──▶ Q │
//!   Producer ◀──────dequeue────── └──────────────────────┘
//! ```

mod error;
mod memory;
mod supervisor;

pub use error::{QueueError, QueueResult, QueueStartError};
pub use memory::{BoundedQueueFactory, InMemoryQueue, InMemoryQueueFactory};
pub use supervisor::{QueueStart, QueueSupervisor, DEFAULT_REGISTRY};

use crate::messaging::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Process-wide address of a topic's buffer
///
/// Derived only from the supervisor's registry identity and the topic, so any component
/// can recompute it independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueName {
    registry: String,
    topic: String,
}

impl QueueName {
    pub fn new(registry: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            topic: topic.into(),
        }
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.registry, self.topic)
    }
}

/// FIFO buffer between the transport client and the producer
#[async_trait]
pub trait BufferQueue: Send + Sync {
    /// Name the queue is registered under
    fn name(&self) -> &QueueName;

    /// Append a message; never waits for capacity
    async fn enqueue(&self, message: Message) -> QueueResult<()>;

    /// Take up to `max_count` messages in arrival order; returns immediately
    async fn dequeue(&self, max_count: usize) -> QueueResult<Vec<Message>>;

    /// Put dequeued but undelivered messages back at the head, keeping their order
    ///
    /// Capacity limits do not apply; these messages were already admitted once.
    async fn requeue_front(&self, messages: Vec<Message>) -> QueueResult<()>;

    /// Number of buffered messages
    async fn len(&self) -> QueueResult<usize>;

    async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Creates queue instances for the supervisor
pub trait QueueFactory: Send + Sync + fmt::Debug {
    /// Short implementation name used in logs
    fn kind(&self) -> &'static str;

    /// Build a queue for `name`. Called at most once per name while it stays registered.
    fn create(&self, name: QueueName) -> QueueResult<Arc<dyn BufferQueue>>;
}

/// What a bounded queue discards when full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered message to make room
    #[default]
    DropOldest,
    /// Discard the incoming message
    DropNewest,
}

/// Queue implementation selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    #[default]
    InMemory,
    Bounded,
}
