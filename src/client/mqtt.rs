//! MQTT transport client implementation
//!
//! Sessions are backed by `rumqttc`. Each started client id gets its own `AsyncClient`
//! and a spawned task polling the event loop, which:
//! - subscribes on every ConnAck, so subscriptions survive reconnects
//! - forwards matching publishes into the buffer queue
//! - backs off between connection errors and lets `rumqttc` reconnect

use crate::client::error::{ClientError, ClientResult, ClientStartError};
use crate::client::{deliver, ClientStartRequest, TransportClient};
use crate::config::TransportKind;
use crate::messaging::{Message, Subscription};
use crate::metrics::PRODUCER_METRICS;
use crate::queue::{QueueName, QueueSupervisor};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Transport};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

/// Upper bound for flushing the DISCONNECT packet
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

static SHARED: Lazy<Arc<MqttTransport>> = Lazy::new(|| Arc::new(MqttTransport::new()));

struct MqttSession {
    shutdown: oneshot::Sender<()>,
    event_loop: JoinHandle<()>,
}

/// MQTT client keyed by client identifier
#[derive(Default)]
pub struct MqttTransport {
    sessions: DashMap<String, MqttSession>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance, so duplicate client ids are caught across producers
    pub fn shared() -> Arc<dyn TransportClient> {
        let transport: Arc<MqttTransport> = Arc::clone(&SHARED);
        transport
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttTransport")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

fn mqtt_options(request: &ClientStartRequest) -> MqttOptions {
    let connection = &request.connection;
    let mut options = MqttOptions::new(
        request.client_id.clone(),
        connection.host.clone(),
        connection.port,
    );

    options.set_keep_alive(request.options.keep_alive.unwrap_or_else(|| connection.keep_alive()));
    options.set_clean_session(
        request
            .options
            .clean_session
            .unwrap_or(connection.clean_session),
    );

    if let Some(ref username) = connection.username {
        options.set_credentials(username, connection.password.as_deref().unwrap_or(""));
    }

    if connection.tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    options
}

#[async_trait]
impl TransportClient for MqttTransport {
    fn kind(&self) -> &'static str {
        "mqtt"
    }

    async fn start(&self, request: ClientStartRequest) -> Result<(), ClientStartError> {
        if request.connection.transport != TransportKind::Mqtt {
            return Err(ClientStartError::Ignore(format!(
                "transport {} is not handled by the mqtt client",
                request.connection.transport
            )));
        }

        match self.sessions.entry(request.client_id.clone()) {
            Entry::Occupied(_) => Err(ClientStartError::AlreadyStarted {
                client_id: request.client_id,
            }),
            Entry::Vacant(entry) => {
                let runtime = tokio::runtime::Handle::try_current()
                    .map_err(|e| ClientStartError::Failed(format!("no tokio runtime: {}", e)))?;

                let options = mqtt_options(&request);
                let (client, event_loop) =
                    AsyncClient::new(options, request.connection.channel_capacity);
                let (shutdown, shutdown_rx) = oneshot::channel();

                let span = info_span!(
                    "mqtt_session",
                    client_id = %request.client_id,
                    host = %request.connection.host,
                    port = request.connection.port,
                );
                let session = SessionLoop {
                    client,
                    event_loop,
                    subscription: request.subscription,
                    queue: request.queue,
                    supervisor: request.supervisor,
                    reconnect_delay: request.connection.reconnect_delay(),
                };
                let event_loop = runtime.spawn(session.run(shutdown_rx).instrument(span));

                entry.insert(MqttSession {
                    shutdown,
                    event_loop,
                });
                PRODUCER_METRICS
                    .active_sessions
                    .with_label_values(&[self.kind()])
                    .inc();

                info!(client_id = %request.client_id, "MQTT session started");
                Ok(())
            }
        }
    }

    async fn disconnect(&self, client_id: &str) -> ClientResult<()> {
        let Some((_, session)) = self.sessions.remove(client_id) else {
            debug!(client_id, "No MQTT session to disconnect");
            return Ok(());
        };

        PRODUCER_METRICS
            .active_sessions
            .with_label_values(&[self.kind()])
            .dec();

        // Event loop may already be gone if it panicked
        let _ = session.shutdown.send(());
        session
            .event_loop
            .await
            .map_err(|e| ClientError::DisconnectFailed(e.to_string()))?;

        info!(client_id, "MQTT session disconnected");
        Ok(())
    }

    fn is_started(&self, client_id: &str) -> bool {
        self.sessions.contains_key(client_id)
    }
}

struct SessionLoop {
    client: AsyncClient,
    event_loop: EventLoop,
    subscription: Subscription,
    queue: QueueName,
    supervisor: QueueSupervisor,
    reconnect_delay: Duration,
}

impl SessionLoop {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        debug!("MQTT event loop started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = self.event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(code = ?ack.code, "Connected to broker");
                        self.subscribe();
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        debug!(return_codes = ?ack.return_codes, "Subscription acknowledged");
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = Message::from(publish);
                        if self.subscription.matches(&message.topic) {
                            // Failures are logged by deliver
                            let _ = deliver(&self.supervisor, &self.queue, message).await;
                        } else {
                            debug!(topic = %message.topic, "Ignoring publish outside subscription");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, delay_ms = self.reconnect_delay.as_millis() as u64, "MQTT connection error, reconnecting");
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = tokio::time::sleep(self.reconnect_delay) => {}
                        }
                    }
                },
            }
        }

        self.flush_disconnect().await;
        debug!("MQTT event loop stopped");
    }

    fn subscribe(&self) {
        if let Err(e) = self
            .client
            .try_subscribe(self.subscription.topic.clone(), self.subscription.qos.into())
        {
            warn!(topic = %self.subscription.topic, error = %e, "Failed to request subscription");
        }
    }

    /// Queue a DISCONNECT and poll until it is written out
    async fn flush_disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "Disconnect request not queued");
            return;
        }

        let event_loop = &mut self.event_loop;
        let drain = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        };

        if tokio::time::timeout(DISCONNECT_TIMEOUT, drain).await.is_err() {
            warn!("Timed out flushing MQTT disconnect");
        }
    }
}
