//! Demand-driven producer implementation

use super::error::{ProducerError, ProducerResult};
use super::state::{DequeueTimer, ProducerState, ProducerStatus};
use crate::client::{ClientStartOptions, ClientStartRequest};
use crate::config::ProducerConfig;
use crate::messaging::{Message, Subscription};
use crate::metrics::PRODUCER_METRICS;
use crate::queue::{BufferQueue, QueueName, QueueStart};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Inputs of the producer event loop
#[derive(Debug)]
pub(crate) enum ProducerEvent {
    /// The pipeline can take this many more messages
    Demand(usize),
    /// A scheduled dequeue retry fired
    DequeueTimer { generation: u64 },
    Shutdown,
}

enum Flow {
    Continue,
    Stop,
}

/// Entry point for starting producers
pub struct Producer;

impl Producer {
    /// Start the buffer queue and transport client for `subscription` and spawn the
    /// producer task
    ///
    /// The queue is started under the configured supervisor (or attached to when it already
    /// runs) and is never owned by the producer. Any queue or client start failure is
    /// returned here and nothing is spawned.
    pub async fn start(
        config: ProducerConfig,
        subscription: Subscription,
        options: ClientStartOptions,
    ) -> ProducerResult<(ProducerHandle, Batches)> {
        let queue = config.queue_supervisor().queue_name(&subscription.topic);
        let client_id = options
            .client_id
            .clone()
            .unwrap_or_else(|| config.identity().resolve());

        let span = info_span!(
            "producer",
            client_id = %client_id,
            topic = %subscription.topic,
            qos = subscription.qos.level(),
            host = %config.connection().host,
            port = config.connection().port,
        );

        start_dependencies(&config, &subscription, &queue, &client_id, options)
            .instrument(span.clone())
            .await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (batches_tx, batches_rx) = mpsc::unbounded_channel();
        let state = ProducerState::new(client_id.clone(), config, queue.clone());
        let (status_tx, status_rx) = watch::channel(state.status(true));

        let worker = ProducerWorker {
            state,
            events: events_rx,
            self_events: events_tx.downgrade(),
            batches: batches_tx,
            status: status_tx,
        };
        let task = tokio::spawn(worker.run().instrument(span));

        let handle = ProducerHandle {
            events: events_tx,
            status: status_rx,
            task: Arc::new(Mutex::new(Some(task))),
            client_id,
            queue,
        };

        Ok((
            handle,
            Batches {
                receiver: batches_rx,
            },
        ))
    }
}

async fn start_dependencies(
    config: &ProducerConfig,
    subscription: &Subscription,
    queue: &QueueName,
    client_id: &str,
    options: ClientStartOptions,
) -> ProducerResult<()> {
    info!(
        connection = %config.connection().log_metadata(),
        queue = %queue,
        "Starting producer"
    );

    let supervisor = config.queue_supervisor();
    match supervisor.start_queue(queue, config.queue().as_ref()) {
        Ok(QueueStart::Started(_)) => {
            debug!(queue = %queue, kind = config.queue().kind(), "Buffer queue started");
        }
        Ok(QueueStart::AlreadyStarted(_)) => {
            info!(queue = %queue, "Buffer queue already running, attaching");
        }
        Err(source) => {
            error!(queue = %queue, error = %source, "Buffer queue failed to start");
            return Err(ProducerError::QueueStart {
                queue: queue.clone(),
                source,
            });
        }
    }

    let request = ClientStartRequest {
        client_id: client_id.to_string(),
        connection: config.connection().clone(),
        subscription: subscription.clone(),
        queue: queue.clone(),
        supervisor: supervisor.clone(),
        options,
    };

    config.client().start(request).await.map_err(|source| {
        error!(
            client = config.client().kind(),
            error = %source,
            "Transport client failed to start"
        );
        ProducerError::ClientStart {
            client_id: client_id.to_string(),
            source,
        }
    })?;

    Ok(())
}

/// State-owning side of a running producer
struct ProducerWorker {
    state: ProducerState,
    events: mpsc::UnboundedReceiver<ProducerEvent>,
    self_events: mpsc::WeakUnboundedSender<ProducerEvent>,
    batches: mpsc::UnboundedSender<Vec<Message>>,
    status: watch::Sender<ProducerStatus>,
}

impl ProducerWorker {
    async fn run(mut self) -> ProducerResult<()> {
        info!(queue = %self.state.queue, "Producer running");

        let outcome = AssertUnwindSafe(self.event_loop()).catch_unwind().await;

        self.state.cancel_timer();
        self.disconnect().await;
        self.publish(false);

        match outcome {
            Ok(Ok(())) => {
                info!("Producer stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, subsystem = e.subsystem(), "Producer stopped on error");
                Err(e)
            }
            Err(panic) => {
                error!("Producer panicked, client disconnected");
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn event_loop(&mut self) -> ProducerResult<()> {
        while let Some(event) = self.events.recv().await {
            let flow = match event {
                ProducerEvent::Demand(additional) => {
                    self.state.add_demand(additional);
                    debug!(additional, demand = self.state.demand, "Demand received");
                    self.dispatch().await?
                }
                ProducerEvent::DequeueTimer { generation } => {
                    if self.state.fire_timer(generation) {
                        self.dispatch().await?
                    } else {
                        debug!(generation, "Ignoring superseded dequeue timer");
                        Flow::Continue
                    }
                }
                ProducerEvent::Shutdown => {
                    info!("Shutdown requested");
                    Flow::Stop
                }
            };

            self.publish(true);

            if let Flow::Stop = flow {
                break;
            }
        }

        Ok(())
    }

    /// Pull up to `demand` messages and hand them to the pipeline
    async fn dispatch(&mut self) -> ProducerResult<Flow> {
        self.state.cancel_timer();

        if self.state.demand == 0 {
            return Ok(Flow::Continue);
        }

        if self.batches.is_closed() {
            info!("Pipeline receiver dropped");
            return Ok(Flow::Stop);
        }

        let topic = self.state.queue.topic().to_string();
        let interval = self.state.config.dequeue_interval();

        let Some(queue) = self.state.config.queue_supervisor().lookup(&self.state.queue) else {
            warn!(queue = %self.state.queue, "Buffer queue not running, retrying later");
            self.schedule_retry(interval);
            return Ok(Flow::Continue);
        };

        let messages = match queue.dequeue(self.state.demand).await {
            Ok(messages) => messages,
            Err(source) => {
                PRODUCER_METRICS
                    .dequeue_attempts
                    .with_label_values(&[&topic, "error"])
                    .inc();
                return Err(ProducerError::Dequeue {
                    queue: self.state.queue.clone(),
                    source,
                });
            }
        };

        let count = messages.len();
        if count == 0 {
            PRODUCER_METRICS
                .dequeue_attempts
                .with_label_values(&[&topic, "empty"])
                .inc();
            self.schedule_retry(interval);
            return Ok(Flow::Continue);
        }

        self.state.satisfy(count);
        let outcome = if self.state.demand == 0 { "full" } else { "partial" };
        PRODUCER_METRICS
            .dequeue_attempts
            .with_label_values(&[&topic, outcome])
            .inc();

        if let Err(mpsc::error::SendError(messages)) = self.batches.send(messages) {
            warn!(count, "Pipeline receiver dropped, returning batch to queue");
            if let Err(source) = queue.requeue_front(messages).await {
                return Err(ProducerError::Dequeue {
                    queue: self.state.queue.clone(),
                    source,
                });
            }
            return Ok(Flow::Stop);
        }

        PRODUCER_METRICS
            .messages_delivered
            .with_label_values(&[&topic])
            .inc_by(count as f64);
        debug!(delivered = count, demand = self.state.demand, "Batch delivered");

        if self.state.demand > 0 {
            self.schedule_retry(Duration::ZERO);
        }

        Ok(Flow::Continue)
    }

    /// Arrange for a `DequeueTimer` event after `delay`
    ///
    /// A zero delay posts the event straight onto this producer's own queue, so it is
    /// handled after events that are already waiting.
    fn schedule_retry(&mut self, delay: Duration) {
        let generation = self.state.next_generation();

        let task = if delay.is_zero() {
            if let Some(events) = self.self_events.upgrade() {
                let _ = events.send(ProducerEvent::DequeueTimer { generation });
            }
            None
        } else {
            let events = self.self_events.clone();
            Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(events) = events.upgrade() {
                    let _ = events.send(ProducerEvent::DequeueTimer { generation });
                }
            }))
        };

        self.state.set_timer(DequeueTimer::new(generation, delay, task));
    }

    fn publish(&self, running: bool) {
        let status = self.state.status(running);
        let demand = if running { status.demand } else { 0 };
        PRODUCER_METRICS
            .demand_outstanding
            .with_label_values(&[self.state.queue.topic()])
            .set(demand as f64);
        self.status.send_replace(status);
    }

    async fn disconnect(&mut self) {
        let client = self.state.config.client().clone();
        match client.disconnect(&self.state.client_id).await {
            Ok(()) => info!(client = client.kind(), "Transport client disconnected"),
            Err(e) => error!(client = client.kind(), error = %e, "Failed to disconnect transport client"),
        }
    }
}

/// Handle to a running producer
///
/// Clones share the same producer. The producer stops once it is told to shut down, once
/// every handle is dropped, or once the [`Batches`] receiver is dropped.
#[derive(Clone)]
pub struct ProducerHandle {
    events: mpsc::UnboundedSender<ProducerEvent>,
    status: watch::Receiver<ProducerStatus>,
    task: Arc<Mutex<Option<JoinHandle<ProducerResult<()>>>>>,
    client_id: String,
    queue: QueueName,
}

impl ProducerHandle {
    /// Signal that the pipeline can accept `demand` more messages
    pub fn ask(&self, demand: usize) -> ProducerResult<()> {
        if demand == 0 {
            return Ok(());
        }

        self.events
            .send(ProducerEvent::Demand(demand))
            .map_err(|_| ProducerError::Stopped(format!("producer {} is not running", self.client_id)))
    }

    /// Latest published status
    pub fn status(&self) -> ProducerStatus {
        *self.status.borrow()
    }

    /// Wait until the published status satisfies `predicate`
    pub async fn wait_for_status<F>(&self, predicate: F) -> ProducerResult<ProducerStatus>
    where
        F: FnMut(&ProducerStatus) -> bool,
    {
        let mut status = self.status.clone();
        let current = *status
            .wait_for(predicate)
            .await
            .map_err(|_| ProducerError::Stopped(format!("producer {} has exited", self.client_id)))?;
        Ok(current)
    }

    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn queue_name(&self) -> &QueueName {
        &self.queue
    }

    /// Stop the producer and wait until its client is disconnected
    ///
    /// Returns the error that stopped the producer, if any. The buffer queue keeps running.
    pub async fn shutdown(&self) -> ProducerResult<()> {
        let _ = self.events.send(ProducerEvent::Shutdown);
        self.join().await
    }

    /// Wait for the producer task to finish
    ///
    /// Only the first caller across all clones observes the outcome; later calls return
    /// `Ok(())`.
    pub async fn join(&self) -> ProducerResult<()> {
        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ProducerError::TaskFailed("producer task panicked".to_string())),
            Err(e) => Err(ProducerError::TaskFailed(e.to_string())),
        }
    }
}

impl std::fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("client_id", &self.client_id)
            .field("queue", &self.queue)
            .field("status", &self.status())
            .finish()
    }
}

/// Receiving side of the batches a producer delivers
///
/// Every batch holds at most the demand outstanding when it was dequeued.
#[derive(Debug)]
pub struct Batches {
    receiver: mpsc::UnboundedReceiver<Vec<Message>>,
}

impl Batches {
    /// Next batch, or `None` once the producer has stopped and all batches are read
    pub async fn recv(&mut self) -> Option<Vec<Message>> {
        self.receiver.recv().await
    }

    /// Next batch if one is already waiting
    pub fn try_recv(&mut self) -> Option<Vec<Message>> {
        self.receiver.try_recv().ok()
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<Vec<Message>> {
        UnboundedReceiverStream::new(self.receiver)
    }
}
