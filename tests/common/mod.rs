//! Shared helpers for integration tests
//!
//! Producers here run against the in-process `LocalBroker` with their own queue
//! supervisor, so tests never share queues or need a network broker.

#![allow(dead_code)]

use llm_mqtt_ingest::client::LocalBroker;
use llm_mqtt_ingest::config::{ConfigOverrides, ConfigResolver, ProducerConfig, Settings};
use llm_mqtt_ingest::messaging::{Message, QoS};
use llm_mqtt_ingest::producer::Batches;
use llm_mqtt_ingest::queue::{InMemoryQueueFactory, QueueFactory, QueueSupervisor};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// Producer config wired to `broker` and `supervisor`
pub fn producer_config(
    broker: &LocalBroker,
    supervisor: &QueueSupervisor,
    dequeue_interval: Duration,
) -> ProducerConfig {
    producer_config_with_queue(broker, supervisor, dequeue_interval, Arc::new(InMemoryQueueFactory))
}

/// Like [`producer_config`], with buffer queues built by `queue`
pub fn producer_config_with_queue(
    broker: &LocalBroker,
    supervisor: &QueueSupervisor,
    dequeue_interval: Duration,
    queue: Arc<dyn QueueFactory>,
) -> ProducerConfig {
    ConfigResolver::resolve(
        &Settings::default(),
        ConfigOverrides::new()
            .client(Arc::new(broker.clone()))
            .queue(queue)
            .queue_supervisor(supervisor.clone())
            .dequeue_interval(dequeue_interval)
            .client_id_prefix("it"),
    )
    .expect("test config resolves")
}

/// Publish `reading-<n>` for every `n` in `range`
pub async fn publish_readings(broker: &LocalBroker, topic: &str, range: std::ops::Range<usize>) {
    for n in range {
        broker
            .publish(topic, QoS::AtMostOnce, format!("reading-{}", n))
            .await;
    }
}

pub fn payloads(batch: &[Message]) -> Vec<String> {
    batch
        .iter()
        .map(|m| m.payload_str().unwrap_or_default().to_string())
        .collect()
}

pub fn readings(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|n| format!("reading-{}", n)).collect()
}

/// Next batch, failing the test if none arrives in time
pub async fn next_batch(batches: &mut Batches) -> Vec<Message> {
    tokio::time::timeout(WAIT, batches.recv())
        .await
        .expect("batch arrives in time")
        .expect("producer still running")
}
