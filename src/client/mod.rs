//! Transport clients
//!
//! A transport client owns the live broker connection for one producer. Once started it
//! forwards every publish that matches the subscription into the producer's buffer queue,
//! looking the queue up by name on each delivery. Reconnection, QoS acknowledgement and
//! wire-level retry stay inside the client; the producer only starts and disconnects it.

mod error;
mod local;
mod mqtt;

pub use error::{ClientError, ClientResult, ClientStartError};
pub use local::LocalBroker;
pub use mqtt::MqttTransport;

use crate::config::ConnectionConfig;
use crate::messaging::{Message, Subscription};
use crate::queue::{BufferQueue, QueueError, QueueName, QueueSupervisor};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{error, warn};

/// Per-start options passed through by the caller of `Producer::start`
#[derive(Debug, Clone, Default)]
pub struct ClientStartOptions {
    /// Use this identifier instead of the configured identity
    pub client_id: Option<String>,

    /// Override the configured clean-session flag
    pub clean_session: Option<bool>,

    /// Override the configured keep-alive interval
    pub keep_alive: Option<Duration>,
}

impl ClientStartOptions {
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = Some(clean_session);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }
}

/// Everything a client needs to open a session
#[derive(Debug, Clone)]
pub struct ClientStartRequest {
    pub client_id: String,
    pub connection: ConnectionConfig,
    pub subscription: Subscription,
    pub queue: QueueName,
    pub supervisor: QueueSupervisor,
    pub options: ClientStartOptions,
}

/// Broker connection owned by a producer
#[async_trait]
pub trait TransportClient: Send + Sync + fmt::Debug {
    /// Short implementation name used in logs and metrics
    fn kind(&self) -> &'static str;

    /// Open a session and start forwarding publishes into `request.queue`
    async fn start(&self, request: ClientStartRequest) -> Result<(), ClientStartError>;

    /// Close the session for `client_id`; closing an unknown session is a no-op
    async fn disconnect(&self, client_id: &str) -> ClientResult<()>;

    /// Whether a session for `client_id` is currently started
    fn is_started(&self, client_id: &str) -> bool;
}

/// Hand an inbound message to the named queue
///
/// Shared by client implementations. A missing queue is logged and the message dropped.
pub(crate) async fn deliver(
    supervisor: &QueueSupervisor,
    queue: &QueueName,
    message: Message,
) -> ClientResult<()> {
    let Some(target) = supervisor.lookup(queue) else {
        warn!(queue = %queue, topic = %message.topic, "Queue not running, dropping message");
        return Err(QueueError::NotFound(queue.to_string()).into());
    };

    target.enqueue(message).await.map_err(|e| {
        error!(queue = %queue, error = %e, "Failed to enqueue message");
        ClientError::from(e)
    })
}
