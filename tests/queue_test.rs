use llm_mqtt_ingest::messaging::{Message, QoS};
use llm_mqtt_ingest::queue::{
    BoundedQueueFactory, BufferQueue, InMemoryQueueFactory, OverflowPolicy, QueueStart,
    QueueSupervisor,
};
use tokio_test::assert_ok;

fn reading(n: usize) -> Message {
    Message::new("sensors/temp", QoS::AtLeastOnce, format!("reading-{}", n))
}

/// Starting a queue twice attaches to the first one
#[tokio::test]
async fn test_second_start_attaches_to_existing_buffer() {
    let supervisor = QueueSupervisor::new("qt.idempotent");
    let name = supervisor.queue_name("sensors/temp");

    let first = assert_ok!(supervisor.start_queue(&name, &InMemoryQueueFactory));
    for n in 0..3 {
        first.queue().enqueue(reading(n)).await.unwrap();
    }

    // A different factory on restart does not replace the running queue
    let second = supervisor
        .start_queue(&name, &BoundedQueueFactory::new(1, OverflowPolicy::DropNewest))
        .unwrap();
    assert!(matches!(second, QueueStart::AlreadyStarted(_)));

    let batch = second.queue().dequeue(10).await.unwrap();
    assert_eq!(batch.len(), 3);
    assert_eq!(batch[0].payload_str(), Some("reading-0"));
}

#[tokio::test]
async fn test_queue_is_resolvable_by_name_alone() {
    let supervisor = QueueSupervisor::new("qt.lookup");
    let name = supervisor.queue_name("alerts/disk");
    supervisor.start_queue(&name, &InMemoryQueueFactory).unwrap();

    // An independent handle derives the same name from the topic
    let other_handle = supervisor.clone();
    let resolved = other_handle
        .lookup(&other_handle.queue_name("alerts/disk"))
        .expect("queue registered");
    resolved.enqueue(reading(1)).await.unwrap();

    assert_eq!(supervisor.lookup(&name).unwrap().len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_registries_are_isolated() {
    let a = QueueSupervisor::new("qt.a");
    let b = QueueSupervisor::new("qt.b");

    a.start_queue(&a.queue_name("t"), &InMemoryQueueFactory).unwrap();

    assert!(b.lookup(&b.queue_name("t")).is_none());
    assert_ne!(a.queue_name("t"), b.queue_name("t"));
}

#[tokio::test]
async fn test_bounded_queue_never_blocks_enqueue() {
    let supervisor = QueueSupervisor::new("qt.bounded");
    let name = supervisor.queue_name("firehose");
    let started = supervisor
        .start_queue(&name, &BoundedQueueFactory::new(100, OverflowPolicy::DropOldest))
        .unwrap();
    let queue = started.queue();

    for n in 0..1_000 {
        queue.enqueue(reading(n)).await.unwrap();
    }

    let batch = queue.dequeue(1_000).await.unwrap();
    assert_eq!(batch.len(), 100);
    assert_eq!(batch[0].payload_str(), Some("reading-900"));
    assert_eq!(batch[99].payload_str(), Some("reading-999"));
}
