//! Queue supervision and name registry

use crate::queue::error::QueueStartError;
use crate::queue::{BufferQueue, QueueFactory, QueueName};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Registry identity of the process-wide default supervisor
pub const DEFAULT_REGISTRY: &str = "llm_mqtt_ingest.queues";

static GLOBAL_SUPERVISOR: Lazy<QueueSupervisor> =
    Lazy::new(|| QueueSupervisor::new(DEFAULT_REGISTRY));

/// Successful outcome of [`QueueSupervisor::start_queue`]
pub enum QueueStart {
    /// A new queue was created
    Started(Arc<dyn BufferQueue>),
    /// A queue was already registered under the name; its contents are untouched
    AlreadyStarted(Arc<dyn BufferQueue>),
}

impl QueueStart {
    pub fn queue(&self) -> &Arc<dyn BufferQueue> {
        match self {
            QueueStart::Started(queue) | QueueStart::AlreadyStarted(queue) => queue,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, QueueStart::Started(_))
    }
}

impl fmt::Debug for QueueStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueStart::Started(queue) => write!(f, "Started({})", queue.name()),
            QueueStart::AlreadyStarted(queue) => write!(f, "AlreadyStarted({})", queue.name()),
        }
    }
}

struct SupervisorInner {
    registry: String,
    queues: DashMap<QueueName, Arc<dyn BufferQueue>>,
    accepting: AtomicBool,
}

/// Owns buffer queues independently of any producer
///
/// Cloning yields another handle to the same registry. Queues stay alive until they are
/// terminated here, whatever happens to the producers reading from them.
#[derive(Clone)]
pub struct QueueSupervisor {
    inner: Arc<SupervisorInner>,
}

impl QueueSupervisor {
    /// Create a supervisor with its own registry identity
    pub fn new(registry: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                registry: registry.into(),
                queues: DashMap::new(),
                accepting: AtomicBool::new(true),
            }),
        }
    }

    /// Process-wide default supervisor
    pub fn global() -> QueueSupervisor {
        GLOBAL_SUPERVISOR.clone()
    }

    pub fn registry(&self) -> &str {
        &self.inner.registry
    }

    /// Name of the queue buffering `topic` under this supervisor
    pub fn queue_name(&self, topic: &str) -> QueueName {
        QueueName::new(self.inner.registry.clone(), topic)
    }

    /// Start the queue for `name`, or attach to it if it already runs
    pub fn start_queue(
        &self,
        name: &QueueName,
        factory: &dyn QueueFactory,
    ) -> Result<QueueStart, QueueStartError> {
        if !self.inner.accepting.load(Ordering::Acquire) {
            return Err(QueueStartError::Ignore(format!(
                "supervisor {} is shut down",
                self.inner.registry
            )));
        }

        if name.registry() != self.inner.registry {
            return Err(QueueStartError::Failed(format!(
                "queue {} does not belong to registry {}",
                name, self.inner.registry
            )));
        }

        match self.inner.queues.entry(name.clone()) {
            Entry::Occupied(entry) => {
                debug!(queue = %name, "Queue already running");
                Ok(QueueStart::AlreadyStarted(entry.get().clone()))
            }
            Entry::Vacant(entry) => {
                let queue = factory.create(name.clone())?;
                entry.insert(queue.clone());
                info!(queue = %name, kind = factory.kind(), "Queue started");
                Ok(QueueStart::Started(queue))
            }
        }
    }

    /// Resolve a queue by name
    pub fn lookup(&self, name: &QueueName) -> Option<Arc<dyn BufferQueue>> {
        self.inner.queues.get(name).map(|entry| entry.value().clone())
    }

    /// Stop supervising a queue; its buffered messages are dropped with it
    pub fn terminate_queue(&self, name: &QueueName) -> bool {
        let removed = self.inner.queues.remove(name).is_some();
        if removed {
            info!(queue = %name, "Queue terminated");
        }
        removed
    }

    /// Terminate every queue and refuse further starts
    pub fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::Release);
        let count = self.inner.queues.len();
        self.inner.queues.clear();
        info!(registry = %self.inner.registry, queues = count, "Queue supervisor shut down");
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    pub fn queue_count(&self) -> usize {
        self.inner.queues.len()
    }
}

impl fmt::Debug for QueueSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSupervisor")
            .field("registry", &self.inner.registry)
            .field("queues", &self.inner.queues.len())
            .finish()
    }
}

impl Default for QueueSupervisor {
    fn default() -> Self {
        Self::global()
    }
}
