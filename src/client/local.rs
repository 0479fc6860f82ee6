//! In-process broker
//!
//! `LocalBroker` implements [`TransportClient`] without a network: tests and embedded
//! deployments publish into it directly and it fans each message out to every started
//! session whose subscription matches.

use crate::client::error::{ClientResult, ClientStartError};
use crate::client::{deliver, ClientStartRequest, TransportClient};
use crate::messaging::{Message, QoS, Subscription};
use crate::metrics::PRODUCER_METRICS;
use crate::queue::{QueueName, QueueSupervisor};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
struct LocalSession {
    subscription: Subscription,
    queue: QueueName,
    supervisor: QueueSupervisor,
}

/// Broker living inside the current process
///
/// Clones share the same sessions.
#[derive(Clone, Default)]
pub struct LocalBroker {
    sessions: Arc<DashMap<String, LocalSession>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a message; returns how many sessions it was delivered to
    ///
    /// Each session receives the message at `min(qos, subscription qos)`.
    pub async fn publish(&self, topic: &str, qos: QoS, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();

        let targets: Vec<LocalSession> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().subscription.matches(topic))
            .map(|entry| entry.value().clone())
            .collect();

        let mut delivered = 0;
        for session in targets {
            let message = Message::new(topic, qos.min(session.subscription.qos), payload.clone());
            if deliver(&session.supervisor, &session.queue, message).await.is_ok() {
                delivered += 1;
            }
        }

        debug!(topic, delivered, "Local publish");
        delivered
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl fmt::Debug for LocalBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBroker")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[async_trait]
impl TransportClient for LocalBroker {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn start(&self, request: ClientStartRequest) -> Result<(), ClientStartError> {
        match self.sessions.entry(request.client_id.clone()) {
            Entry::Occupied(_) => Err(ClientStartError::AlreadyStarted {
                client_id: request.client_id,
            }),
            Entry::Vacant(entry) => {
                entry.insert(LocalSession {
                    subscription: request.subscription.clone(),
                    queue: request.queue.clone(),
                    supervisor: request.supervisor,
                });
                PRODUCER_METRICS
                    .active_sessions
                    .with_label_values(&[self.kind()])
                    .inc();
                info!(
                    client_id = %request.client_id,
                    subscription = %request.subscription,
                    queue = %request.queue,
                    "Local session started"
                );
                Ok(())
            }
        }
    }

    async fn disconnect(&self, client_id: &str) -> ClientResult<()> {
        if self.sessions.remove(client_id).is_some() {
            PRODUCER_METRICS
                .active_sessions
                .with_label_values(&[self.kind()])
                .dec();
            info!(client_id, "Local session disconnected");
        }
        Ok(())
    }

    fn is_started(&self, client_id: &str) -> bool {
        self.sessions.contains_key(client_id)
    }
}
