//! Configuration loading and producer config resolution
//!
//! [`Settings`] is the serializable application layer (embedded defaults, optional file,
//! `LLM_MQTT__*` environment). [`ConfigResolver`] combines it with caller overrides into an
//! immutable [`ProducerConfig`] holding the concrete queue and client implementations.

use crate::client::{MqttTransport, TransportClient};
use crate::error::{AppError, Result};
use crate::identity::ClientIdentity;
use crate::observability::{LogMetadata, ObservabilitySettings};
use crate::queue::{
    BoundedQueueFactory, InMemoryQueueFactory, OverflowPolicy, QueueFactory, QueueKind,
    QueueSupervisor,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Broker connection parameters
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Producer configuration
    #[serde(default)]
    pub producer: ProducerSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

impl Settings {
    /// Load configuration from the embedded defaults, a file and the environment
    ///
    /// The file is `path` if given, else `CONFIG_PATH`, else `config/llm-mqtt-ingest.toml`;
    /// it is optional. Environment variables use the `LLM_MQTT__` prefix with `__` between
    /// sections, e.g. `LLM_MQTT__CONNECTION__PORT=8883`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_string_lossy().into_owned(),
            None => std::env::var("CONFIG_PATH")
                .unwrap_or_else(|_| "config/llm-mqtt-ingest.toml".to_string()),
        };

        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix("LLM_MQTT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.connection.validate()?;
        Ok(settings)
    }
}

/// Transport implementation selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransportKind {
    /// Network MQTT broker
    #[default]
    Mqtt,
    /// In-process [`crate::client::LocalBroker`]
    Local,
}

/// Broker connection parameters, passed through to the transport client
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub transport: TransportKind,

    #[serde(default = "default_host")]
    #[validate(length(min = 1))]
    pub host: String,

    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    pub username: Option<String>,

    /// Never logged; see [`ConnectionConfig::log_metadata`]
    pub password: Option<String>,

    #[serde(default)]
    pub tls: bool,

    #[serde(default = "default_keep_alive_secs")]
    #[validate(range(min = 1))]
    pub keep_alive_secs: u64,

    #[serde(default = "default_true")]
    pub clean_session: bool,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Capacity of the client's outgoing request channel
    #[serde(default = "default_channel_capacity")]
    #[validate(range(min = 1))]
    pub channel_capacity: usize,
}

impl ConnectionConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Connection context for log records, with credentials redacted
    pub fn log_metadata(&self) -> LogMetadata {
        let mut metadata = LogMetadata::new()
            .with("transport", self.transport)
            .with("host", &self.host)
            .with("port", self.port)
            .with("tls", self.tls);

        if let Some(ref username) = self.username {
            metadata.insert("username", username);
        }
        if let Some(ref password) = self.password {
            metadata.insert("password", password);
        }

        metadata
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Mqtt,
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            tls: false,
            keep_alive_secs: default_keep_alive_secs(),
            clean_session: true,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("transport", &self.transport)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field(
                "password",
                &self.password.as_ref().map(|_| crate::observability::REDACTED),
            )
            .field("tls", &self.tls)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("clean_session", &self.clean_session)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerSettings {
    /// Fixed client identifier; wins over `client_id_prefix`
    pub client_id: Option<String>,

    /// Prefix for a per-start unique client identifier
    pub client_id_prefix: Option<String>,

    /// Delay before retrying a dequeue that returned nothing (milliseconds)
    #[serde(default = "default_dequeue_interval_ms")]
    pub dequeue_interval_ms: u64,

    #[serde(default)]
    pub queue: QueueSettings,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_id_prefix: Some(default_client_id_prefix()),
            dequeue_interval_ms: default_dequeue_interval_ms(),
            queue: QueueSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub kind: QueueKind,

    /// Required for `bounded` queues
    pub capacity: Option<usize>,

    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// Resolved, immutable producer configuration
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    connection: ConnectionConfig,
    client: Arc<dyn TransportClient>,
    queue: Arc<dyn QueueFactory>,
    queue_supervisor: QueueSupervisor,
    dequeue_interval: Duration,
    identity: ClientIdentity,
}

impl ProducerConfig {
    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    pub fn client(&self) -> &Arc<dyn TransportClient> {
        &self.client
    }

    pub fn queue(&self) -> &Arc<dyn QueueFactory> {
        &self.queue
    }

    pub fn queue_supervisor(&self) -> &QueueSupervisor {
        &self.queue_supervisor
    }

    pub fn dequeue_interval(&self) -> Duration {
        self.dequeue_interval
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }
}

/// Caller-supplied values that take precedence over [`Settings`]
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub connection: Option<ConnectionConfig>,
    pub client: Option<Arc<dyn TransportClient>>,
    pub queue: Option<Arc<dyn QueueFactory>>,
    pub queue_supervisor: Option<QueueSupervisor>,
    pub dequeue_interval: Option<Duration>,
    pub client_id: Option<String>,
    pub client_id_prefix: Option<String>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn client(mut self, client: Arc<dyn TransportClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn QueueFactory>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn queue_supervisor(mut self, supervisor: QueueSupervisor) -> Self {
        self.queue_supervisor = Some(supervisor);
        self
    }

    pub fn dequeue_interval(mut self, interval: Duration) -> Self {
        self.dequeue_interval = Some(interval);
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn client_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.client_id_prefix = Some(prefix.into());
        self
    }
}

/// Builds [`ProducerConfig`] values
pub struct ConfigResolver;

impl ConfigResolver {
    /// Layer `overrides` on top of `defaults` and validate the result
    ///
    /// Pure apart from reading the process-wide supervisor and MQTT transport handles.
    pub fn resolve(defaults: &Settings, overrides: ConfigOverrides) -> Result<ProducerConfig> {
        let connection = overrides
            .connection
            .unwrap_or_else(|| defaults.connection.clone());
        connection.validate()?;

        let identity = Self::resolve_identity(defaults, overrides.client_id, overrides.client_id_prefix)?;

        let queue = match overrides.queue {
            Some(queue) => queue,
            None => Self::queue_factory(&defaults.producer.queue)?,
        };

        let client = match overrides.client {
            Some(client) => client,
            None => Self::transport_client(connection.transport)?,
        };

        let dequeue_interval = overrides
            .dequeue_interval
            .unwrap_or_else(|| Duration::from_millis(defaults.producer.dequeue_interval_ms));

        Ok(ProducerConfig {
            connection,
            client,
            queue,
            queue_supervisor: overrides
                .queue_supervisor
                .unwrap_or_else(QueueSupervisor::global),
            dequeue_interval,
            identity,
        })
    }

    fn resolve_identity(
        defaults: &Settings,
        client_id: Option<String>,
        client_id_prefix: Option<String>,
    ) -> Result<ClientIdentity> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        if let Some(id) = non_empty(client_id) {
            return Ok(ClientIdentity::Fixed(id));
        }
        if let Some(prefix) = non_empty(client_id_prefix) {
            return Ok(ClientIdentity::Prefix(prefix));
        }
        if let Some(id) = non_empty(defaults.producer.client_id.clone()) {
            return Ok(ClientIdentity::Fixed(id));
        }
        if let Some(prefix) = non_empty(defaults.producer.client_id_prefix.clone()) {
            return Ok(ClientIdentity::Prefix(prefix));
        }

        Err(AppError::Configuration(
            "either client_id or client_id_prefix must be set".to_string(),
        ))
    }

    fn queue_factory(settings: &QueueSettings) -> Result<Arc<dyn QueueFactory>> {
        match settings.kind {
            QueueKind::InMemory => Ok(Arc::new(InMemoryQueueFactory)),
            QueueKind::Bounded => match settings.capacity {
                Some(capacity) if capacity > 0 => {
                    Ok(Arc::new(BoundedQueueFactory::new(capacity, settings.overflow)))
                }
                _ => Err(AppError::Configuration(
                    "bounded queue requires a positive 'capacity'".to_string(),
                )),
            },
        }
    }

    fn transport_client(kind: TransportKind) -> Result<Arc<dyn TransportClient>> {
        match kind {
            TransportKind::Mqtt => Ok(MqttTransport::shared()),
            TransportKind::Local => Err(AppError::Configuration(
                "local transport requires a LocalBroker client override".to_string(),
            )),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    10
}

fn default_dequeue_interval_ms() -> u64 {
    1000
}

fn default_client_id_prefix() -> String {
    "llm-mqtt-ingest".to_string()
}

fn default_true() -> bool {
    true
}
