//! Inbound message type flowing from the transport to the pipeline

use crate::messaging::subscription::QoS;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;

/// Processing status of a message
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MessageStatus {
    /// Not (yet) failed by any stage
    #[default]
    Ok,
    /// Failed by a handler; terminal for this crate
    Failed { reason: String },
}

/// Message metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Message ID
    pub message_id: String,

    /// When the transport handed the message over
    pub received_at: DateTime<Utc>,

    /// Set when the broker flagged the publish as a redelivery
    pub duplicate: bool,

    /// Broker retained flag
    pub retained: bool,

    /// Custom headers
    pub headers: HashMap<String, String>,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            received_at: Utc::now(),
            duplicate: false,
            retained: false,
            headers: HashMap::new(),
        }
    }
}

/// A single inbound publish
///
/// Created by the transport client, owned by the buffer queue while buffered and handed
/// to the pipeline on dequeue. The payload is opaque; `status` is the only part the
/// pipeline is expected to change.
#[derive(Debug, Clone)]
pub struct Message {
    /// Concrete topic the message was published on
    pub topic: String,

    /// QoS the message was delivered with
    pub qos: QoS,

    /// Opaque payload
    pub payload: Bytes,

    /// Message metadata
    pub metadata: MessageMetadata,

    /// Processing status
    pub status: MessageStatus,
}

impl Message {
    /// Create a new message with `Ok` status
    pub fn new(topic: impl Into<String>, qos: QoS, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            qos,
            payload: payload.into(),
            metadata: MessageMetadata::default(),
            status: MessageStatus::Ok,
        }
    }

    /// Add a custom header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.headers.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.metadata.message_id
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, MessageStatus::Ok)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, MessageStatus::Failed { .. })
    }

    /// Failure reason, if the message was failed
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            MessageStatus::Failed { reason } => Some(reason),
            MessageStatus::Ok => None,
        }
    }

    /// Payload interpreted as UTF-8 text
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Payload decoded as JSON
    pub fn payload_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

impl From<rumqttc::Publish> for Message {
    fn from(publish: rumqttc::Publish) -> Self {
        let mut message = Message::new(
            String::from_utf8_lossy(publish.topic.as_ref()).into_owned(),
            publish.qos.into(),
            publish.payload,
        );
        message.metadata.duplicate = publish.dup;
        message.metadata.retained = publish.retain;
        message
    }
}
