//! In-memory queue implementation
//!
//! Each queue is a single task that owns its `VecDeque`; callers talk to it over an
//! unbounded channel, so `enqueue` never waits and no lock is shared between the
//! transport and the producer.

use crate::messaging::Message;
use crate::metrics::PRODUCER_METRICS;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::{BufferQueue, OverflowPolicy, QueueFactory, QueueName};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum QueueCommand {
    Enqueue(Message),
    Dequeue {
        max_count: usize,
        reply: oneshot::Sender<Vec<Message>>,
    },
    Requeue(Vec<Message>),
    Len {
        reply: oneshot::Sender<usize>,
    },
}

/// Volatile FIFO queue backed by a dedicated task
///
/// The task stops once every handle to the queue is dropped, which normally happens when
/// the supervisor terminates the queue.
pub struct InMemoryQueue {
    name: QueueName,
    commands: mpsc::UnboundedSender<QueueCommand>,
}

impl InMemoryQueue {
    /// Spawn an unbounded queue on the current tokio runtime
    pub fn spawn(name: QueueName) -> QueueResult<Self> {
        Self::spawn_with_capacity(name, None, OverflowPolicy::default())
    }

    /// Spawn a queue, optionally bounded to `capacity` messages
    pub fn spawn_with_capacity(
        name: QueueName,
        capacity: Option<usize>,
        overflow: OverflowPolicy,
    ) -> QueueResult<Self> {
        if capacity == Some(0) {
            return Err(QueueError::CreationFailed(format!(
                "queue {} needs a capacity of at least 1",
                name
            )));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| QueueError::CreationFailed(format!("no tokio runtime: {}", e)))?;

        let (commands, receiver) = mpsc::unbounded_channel();
        runtime.spawn(run_queue(name.clone(), receiver, capacity, overflow));

        Ok(Self { name, commands })
    }

    fn send(&self, command: QueueCommand) -> QueueResult<()> {
        self.commands
            .send(command)
            .map_err(|_| QueueError::Closed(self.name.to_string()))
    }
}

#[async_trait]
impl BufferQueue for InMemoryQueue {
    fn name(&self) -> &QueueName {
        &self.name
    }

    async fn enqueue(&self, message: Message) -> QueueResult<()> {
        self.send(QueueCommand::Enqueue(message))
    }

    async fn dequeue(&self, max_count: usize) -> QueueResult<Vec<Message>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let (reply, response) = oneshot::channel();
        self.send(QueueCommand::Dequeue { max_count, reply })?;
        response
            .await
            .map_err(|_| QueueError::Closed(self.name.to_string()))
    }

    async fn requeue_front(&self, messages: Vec<Message>) -> QueueResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        self.send(QueueCommand::Requeue(messages))
    }

    async fn len(&self) -> QueueResult<usize> {
        let (reply, response) = oneshot::channel();
        self.send(QueueCommand::Len { reply })?;
        response
            .await
            .map_err(|_| QueueError::Closed(self.name.to_string()))
    }
}

async fn run_queue(
    name: QueueName,
    mut commands: mpsc::UnboundedReceiver<QueueCommand>,
    capacity: Option<usize>,
    overflow: OverflowPolicy,
) {
    let mut buffer: VecDeque<Message> = VecDeque::new();
    let topic = name.topic().to_string();

    debug!(queue = %name, capacity = ?capacity, "Queue started");

    while let Some(command) = commands.recv().await {
        match command {
            QueueCommand::Enqueue(message) => {
                if let Some(capacity) = capacity {
                    if buffer.len() >= capacity {
                        PRODUCER_METRICS
                            .messages_dropped
                            .with_label_values(&[&topic, &overflow.to_string()])
                            .inc();
                        warn!(queue = %name, capacity, policy = %overflow, "Queue full, dropping message");

                        match overflow {
                            OverflowPolicy::DropOldest => {
                                buffer.pop_front();
                            }
                            OverflowPolicy::DropNewest => continue,
                        }
                    }
                }

                buffer.push_back(message);
                PRODUCER_METRICS
                    .messages_enqueued
                    .with_label_values(&[&topic])
                    .inc();
            }
            QueueCommand::Dequeue { max_count, reply } => {
                let count = max_count.min(buffer.len());
                let batch: Vec<Message> = buffer.drain(..count).collect();

                // Requester went away before the reply; keep the messages at the head
                if let Err(batch) = reply.send(batch) {
                    push_front(&mut buffer, batch);
                }
            }
            QueueCommand::Requeue(batch) => {
                debug!(queue = %name, count = batch.len(), "Messages returned to queue head");
                push_front(&mut buffer, batch);
            }
            QueueCommand::Len { reply } => {
                let _ = reply.send(buffer.len());
            }
        }
    }

    debug!(queue = %name, remaining = buffer.len(), "Queue stopped");
}

fn push_front(buffer: &mut VecDeque<Message>, batch: Vec<Message>) {
    for message in batch.into_iter().rev() {
        buffer.push_front(message);
    }
}

/// Factory for unbounded in-memory queues
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryQueueFactory;

impl QueueFactory for InMemoryQueueFactory {
    fn kind(&self) -> &'static str {
        "in_memory"
    }

    fn create(&self, name: QueueName) -> QueueResult<Arc<dyn BufferQueue>> {
        Ok(Arc::new(InMemoryQueue::spawn(name)?))
    }
}

/// Factory for capacity-limited in-memory queues
#[derive(Debug, Clone, Copy)]
pub struct BoundedQueueFactory {
    capacity: usize,
    overflow: OverflowPolicy,
}

impl BoundedQueueFactory {
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self { capacity, overflow }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }
}

impl QueueFactory for BoundedQueueFactory {
    fn kind(&self) -> &'static str {
        "bounded"
    }

    fn create(&self, name: QueueName) -> QueueResult<Arc<dyn BufferQueue>> {
        Ok(Arc::new(InMemoryQueue::spawn_with_capacity(
            name,
            Some(self.capacity),
            self.overflow,
        )?))
    }
}
