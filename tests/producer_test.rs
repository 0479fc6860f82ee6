mod common;

use async_trait::async_trait;
use common::{
    next_batch, payloads, producer_config, producer_config_with_queue, publish_readings, readings,
    WAIT,
};
use llm_mqtt_ingest::client::{ClientStartError, ClientStartOptions, LocalBroker, MqttTransport, TransportClient};
use llm_mqtt_ingest::config::{ConfigOverrides, ConfigResolver, ConnectionConfig, Settings, TransportKind};
use llm_mqtt_ingest::messaging::{Message, QoS, Subscription};
use llm_mqtt_ingest::producer::{DemandState, Producer, ProducerError, ProducerStatus};
use llm_mqtt_ingest::queue::{
    BufferQueue, InMemoryQueue, QueueError, QueueFactory, QueueName, QueueResult,
    QueueStartError, QueueSupervisor,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn awaiting(demand: usize) -> impl FnMut(&ProducerStatus) -> bool {
    move |s| s.state == DemandState::AwaitingMessages && s.demand == demand
}

/// 12 readings, demand 10 then 5: batches of 10 and 2, 3 units left waiting; a 13th
/// reading satisfies one of them
#[tokio::test]
async fn test_sensor_readings_follow_demand() {
    let broker = LocalBroker::new();
    let supervisor = QueueSupervisor::new("it.sensors");
    let (producer, mut batches) = Producer::start(
        producer_config(&broker, &supervisor, Duration::from_millis(200)),
        Subscription::new("sensors/temp", QoS::AtMostOnce),
        ClientStartOptions::default(),
    )
    .await
    .unwrap();

    publish_readings(&broker, "sensors/temp", 0..12).await;

    producer.ask(10).unwrap();
    let first = next_batch(&mut batches).await;
    assert_eq!(payloads(&first), readings(0..10));

    producer.ask(5).unwrap();
    let second = next_batch(&mut batches).await;
    assert_eq!(payloads(&second), readings(10..12));

    let status = tokio::time::timeout(WAIT, producer.wait_for_status(awaiting(3)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.demand, 3);
    assert!(batches.try_recv().is_none());

    publish_readings(&broker, "sensors/temp", 12..13).await;
    let third = next_batch(&mut batches).await;
    assert_eq!(payloads(&third), readings(12..13));

    tokio::time::timeout(WAIT, producer.wait_for_status(awaiting(2)))
        .await
        .unwrap()
        .unwrap();

    producer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_delivery_never_exceeds_demand() {
    let broker = LocalBroker::new();
    let supervisor = QueueSupervisor::new("it.demand");
    let (producer, mut batches) = Producer::start(
        producer_config(&broker, &supervisor, Duration::from_millis(50)),
        Subscription::new("metrics/cpu", QoS::AtMostOnce),
        ClientStartOptions::default(),
    )
    .await
    .unwrap();

    publish_readings(&broker, "metrics/cpu", 0..7).await;

    let mut requested = 0;
    let mut delivered = Vec::new();
    for demand in [3, 2, 4] {
        producer.ask(demand).unwrap();
        requested += demand;
    }

    while delivered.len() < 7 {
        let batch = next_batch(&mut batches).await;
        delivered.extend(payloads(&batch));
        assert!(delivered.len() <= requested);
    }

    assert_eq!(delivered, readings(0..7));
    let status = tokio::time::timeout(WAIT, producer.wait_for_status(awaiting(2)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.demand, requested - 7);

    producer.shutdown().await.unwrap();
    assert!(batches.try_recv().is_none());
}

#[tokio::test]
async fn test_buffered_messages_survive_producer_restart() {
    let broker = LocalBroker::new();
    let supervisor = QueueSupervisor::new("it.restart");
    let subscription = Subscription::new("orders/new", QoS::AtLeastOnce);

    let (first, mut first_batches) = Producer::start(
        producer_config(&broker, &supervisor, Duration::from_millis(50)),
        subscription.clone(),
        ClientStartOptions::default(),
    )
    .await
    .unwrap();

    publish_readings(&broker, "orders/new", 0..5).await;
    first.ask(2).unwrap();
    assert_eq!(payloads(&next_batch(&mut first_batches).await), readings(0..2));

    first.shutdown().await.unwrap();
    assert!(!broker.is_started(first.client_id()));

    let queue = supervisor.lookup(first.queue_name()).expect("queue outlives producer");
    assert_eq!(queue.len().await.unwrap(), 3);

    let (second, mut second_batches) = Producer::start(
        producer_config(&broker, &supervisor, Duration::from_millis(50)),
        subscription,
        ClientStartOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(second.queue_name(), first.queue_name());
    assert_ne!(second.client_id(), first.client_id());
    assert_eq!(supervisor.queue_count(), 1);

    second.ask(10).unwrap();
    assert_eq!(payloads(&next_batch(&mut second_batches).await), readings(2..5));

    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_disconnects_client() {
    let broker = LocalBroker::new();
    let supervisor = QueueSupervisor::new("it.disconnect");
    let (producer, _batches) = Producer::start(
        producer_config(&broker, &supervisor, Duration::from_millis(50)),
        Subscription::new("t", QoS::AtMostOnce),
        ClientStartOptions::default().with_client_id("disconnect-me"),
    )
    .await
    .unwrap();

    assert_eq!(producer.client_id(), "disconnect-me");
    assert!(broker.is_started("disconnect-me"));

    producer.shutdown().await.unwrap();

    assert!(!broker.is_started("disconnect-me"));
    assert_eq!(broker.session_count(), 0);
    assert_eq!(supervisor.queue_count(), 1);
}

#[tokio::test]
async fn test_dropping_every_handle_disconnects_client() {
    let broker = LocalBroker::new();
    let supervisor = QueueSupervisor::new("it.drop");
    let (producer, mut batches) = Producer::start(
        producer_config(&broker, &supervisor, Duration::from_millis(50)),
        Subscription::new("t", QoS::AtMostOnce),
        ClientStartOptions::default().with_client_id("dropped"),
    )
    .await
    .unwrap();

    drop(producer);

    let end = tokio::time::timeout(WAIT, batches.recv()).await.unwrap();
    assert!(end.is_none());
    assert!(!broker.is_started("dropped"));
}

#[tokio::test]
async fn test_duplicate_client_id_fails_startup() {
    let broker = LocalBroker::new();
    let supervisor = QueueSupervisor::new("it.duplicate");
    let options = ClientStartOptions::default().with_client_id("fixed-id");

    let (producer, _batches) = Producer::start(
        producer_config(&broker, &supervisor, Duration::from_millis(50)),
        Subscription::new("a", QoS::AtMostOnce),
        options.clone(),
    )
    .await
    .unwrap();

    let result = Producer::start(
        producer_config(&broker, &supervisor, Duration::from_millis(50)),
        Subscription::new("b", QoS::AtMostOnce),
        options,
    )
    .await;

    match result {
        Err(ProducerError::ClientStart { client_id, source }) => {
            assert_eq!(client_id, "fixed-id");
            assert_eq!(
                source,
                ClientStartError::AlreadyStarted {
                    client_id: "fixed-id".to_string()
                }
            );
        }
        other => panic!("expected client start failure, got {:?}", other.map(|_| ())),
    }

    // The first producer is unaffected
    assert!(producer.is_running());
    producer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_queue_ignore_fails_startup() {
    let broker = LocalBroker::new();
    let supervisor = QueueSupervisor::new("it.ignore");
    supervisor.shutdown();

    let result = Producer::start(
        producer_config(&broker, &supervisor, Duration::from_millis(50)),
        Subscription::new("t", QoS::AtMostOnce),
        ClientStartOptions::default(),
    )
    .await;

    match result {
        Err(err @ ProducerError::QueueStart { .. }) => {
            assert_eq!(err.subsystem(), "queue");
            assert!(matches!(
                err,
                ProducerError::QueueStart {
                    source: QueueStartError::Ignore(_),
                    ..
                }
            ));
        }
        other => panic!("expected queue start failure, got {:?}", other.map(|_| ())),
    }

    assert_eq!(broker.session_count(), 0);
}

#[tokio::test]
async fn test_client_ignore_fails_startup() {
    let supervisor = QueueSupervisor::new("it.client-ignore");
    let connection = ConnectionConfig {
        transport: TransportKind::Local,
        ..ConnectionConfig::default()
    };
    let config = ConfigResolver::resolve(
        &Settings::default(),
        ConfigOverrides::new()
            .connection(connection)
            .client(Arc::new(MqttTransport::new()))
            .queue_supervisor(supervisor.clone()),
    )
    .unwrap();

    let result = Producer::start(
        config,
        Subscription::new("t", QoS::AtMostOnce),
        ClientStartOptions::default(),
    )
    .await;

    assert!(matches!(
        result,
        Err(ProducerError::ClientStart {
            source: ClientStartError::Ignore(_),
            ..
        })
    ));
    // The queue was started before the client and stays up
    assert_eq!(supervisor.queue_count(), 1);
}

#[tokio::test]
async fn test_terminated_queue_is_retried_not_fatal() {
    let broker = LocalBroker::new();
    let supervisor = QueueSupervisor::new("it.terminated");
    let (producer, _batches) = Producer::start(
        producer_config(&broker, &supervisor, Duration::from_millis(20)),
        Subscription::new("t", QoS::AtMostOnce),
        ClientStartOptions::default(),
    )
    .await
    .unwrap();

    assert!(supervisor.terminate_queue(producer.queue_name()));
    producer.ask(1).unwrap();

    tokio::time::timeout(WAIT, producer.wait_for_status(awaiting(1)))
        .await
        .unwrap()
        .unwrap();
    assert!(producer.is_running());

    producer.shutdown().await.unwrap();
}

/// How a wrapped queue misbehaves on `dequeue`
#[derive(Debug, Clone, Copy)]
enum DequeueFault {
    Error,
    Panic,
}

#[derive(Debug)]
struct FaultyQueueFactory(DequeueFault);

struct FaultyQueue {
    inner: InMemoryQueue,
    fault: DequeueFault,
}

impl QueueFactory for FaultyQueueFactory {
    fn kind(&self) -> &'static str {
        "faulty"
    }

    fn create(&self, name: QueueName) -> QueueResult<Arc<dyn BufferQueue>> {
        Ok(Arc::new(FaultyQueue {
            inner: InMemoryQueue::spawn(name)?,
            fault: self.0,
        }))
    }
}

#[async_trait]
impl BufferQueue for FaultyQueue {
    fn name(&self) -> &QueueName {
        self.inner.name()
    }

    async fn enqueue(&self, message: Message) -> QueueResult<()> {
        self.inner.enqueue(message).await
    }

    async fn dequeue(&self, _max_count: usize) -> QueueResult<Vec<Message>> {
        match self.fault {
            DequeueFault::Error => Err(QueueError::Closed(self.inner.name().to_string())),
            DequeueFault::Panic => panic!("queue state corrupted"),
        }
    }

    async fn requeue_front(&self, messages: Vec<Message>) -> QueueResult<()> {
        self.inner.requeue_front(messages).await
    }

    async fn len(&self) -> QueueResult<usize> {
        self.inner.len().await
    }
}

/// Holds the first non-empty dequeue until released
#[derive(Debug)]
struct DequeueGate {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl DequeueGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[derive(Debug)]
struct GatedQueueFactory(Arc<DequeueGate>);

struct GatedQueue {
    inner: InMemoryQueue,
    gate: Arc<DequeueGate>,
}

impl QueueFactory for GatedQueueFactory {
    fn kind(&self) -> &'static str {
        "gated"
    }

    fn create(&self, name: QueueName) -> QueueResult<Arc<dyn BufferQueue>> {
        Ok(Arc::new(GatedQueue {
            inner: InMemoryQueue::spawn(name)?,
            gate: self.0.clone(),
        }))
    }
}

#[async_trait]
impl BufferQueue for GatedQueue {
    fn name(&self) -> &QueueName {
        self.inner.name()
    }

    async fn enqueue(&self, message: Message) -> QueueResult<()> {
        self.inner.enqueue(message).await
    }

    async fn dequeue(&self, max_count: usize) -> QueueResult<Vec<Message>> {
        let batch = self.inner.dequeue(max_count).await?;
        if !batch.is_empty() && self.gate.armed.swap(false, Ordering::SeqCst) {
            self.gate.entered.notify_one();
            self.gate.release.notified().await;
        }
        Ok(batch)
    }

    async fn requeue_front(&self, messages: Vec<Message>) -> QueueResult<()> {
        self.inner.requeue_front(messages).await
    }

    async fn len(&self) -> QueueResult<usize> {
        self.inner.len().await
    }
}

/// The pipeline goes away while a dequeue is in flight: the taken messages go back
/// to the head of the queue instead of being lost
#[tokio::test]
async fn test_batch_returns_to_queue_when_pipeline_drops_mid_dequeue() {
    let broker = LocalBroker::new();
    let supervisor = QueueSupervisor::new("it.requeue");
    let gate = DequeueGate::new();
    let (producer, batches) = Producer::start(
        producer_config_with_queue(
            &broker,
            &supervisor,
            Duration::from_millis(20),
            Arc::new(GatedQueueFactory(gate.clone())),
        ),
        Subscription::new("t", QoS::AtMostOnce),
        ClientStartOptions::default(),
    )
    .await
    .unwrap();

    publish_readings(&broker, "t", 0..3).await;
    producer.ask(3).unwrap();

    tokio::time::timeout(WAIT, gate.entered.notified()).await.unwrap();
    drop(batches);
    gate.release.notify_one();

    tokio::time::timeout(WAIT, producer.join()).await.unwrap().unwrap();
    assert!(!broker.is_started(producer.client_id()));

    let queue = supervisor.lookup(producer.queue_name()).unwrap();
    assert_eq!(queue.len().await.unwrap(), 3);
    assert_eq!(payloads(&queue.dequeue(10).await.unwrap()), readings(0..3));
}

#[tokio::test]
async fn test_dequeue_error_stops_producer_and_disconnects() {
    let broker = LocalBroker::new();
    let supervisor = QueueSupervisor::new("it.dequeue-error");
    let (producer, _batches) = Producer::start(
        producer_config_with_queue(
            &broker,
            &supervisor,
            Duration::from_millis(20),
            Arc::new(FaultyQueueFactory(DequeueFault::Error)),
        ),
        Subscription::new("t", QoS::AtMostOnce),
        ClientStartOptions::default(),
    )
    .await
    .unwrap();
    assert!(broker.is_started(producer.client_id()));

    producer.ask(1).unwrap();
    let result = tokio::time::timeout(WAIT, producer.join()).await.unwrap();

    match result {
        Err(ProducerError::Dequeue { queue, source }) => {
            assert_eq!(&queue, producer.queue_name());
            assert!(matches!(source, QueueError::Closed(_)));
        }
        other => panic!("expected a dequeue error, got {:?}", other),
    }
    assert!(!broker.is_started(producer.client_id()));
    assert!(!producer.status().running);
}

#[tokio::test]
async fn test_producer_panic_still_disconnects_client() {
    let broker = LocalBroker::new();
    let supervisor = QueueSupervisor::new("it.dequeue-panic");
    let (producer, _batches) = Producer::start(
        producer_config_with_queue(
            &broker,
            &supervisor,
            Duration::from_millis(20),
            Arc::new(FaultyQueueFactory(DequeueFault::Panic)),
        ),
        Subscription::new("t", QoS::AtMostOnce),
        ClientStartOptions::default(),
    )
    .await
    .unwrap();

    producer.ask(1).unwrap();
    let result = tokio::time::timeout(WAIT, producer.join()).await.unwrap();

    assert!(matches!(result, Err(ProducerError::TaskFailed(_))));
    assert!(!broker.is_started(producer.client_id()));
    assert!(!producer.is_running());
}
