//! Handler boundary for user-supplied transforms
//!
//! [`process_message`] and [`process_batch`] run a [`MessageHandler`] and turn both `Err`
//! returns and panics into failed items, so nothing raised by user code escapes into the
//! pipeline.

use crate::messaging::Message;
use crate::metrics::PRODUCER_METRICS;
use crate::pipeline::failure::tag_failed;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{error, warn};

/// User-supplied message transforms
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Transform a single message
    async fn handle_message(&self, message: Message) -> anyhow::Result<Message>;

    /// Transform a batch of already handled messages
    async fn handle_batch(&self, messages: Vec<Message>) -> anyhow::Result<Vec<Message>> {
        Ok(messages)
    }
}

/// Run `handler` on one message
///
/// Messages that are already failed are returned untouched.
pub async fn process_message(handler: &dyn MessageHandler, message: Message) -> Message {
    if message.is_failed() {
        return message;
    }

    let original = message.clone();
    match AssertUnwindSafe(handler.handle_message(message))
        .catch_unwind()
        .await
    {
        Ok(Ok(processed)) => processed,
        Ok(Err(e)) => {
            warn!(message_id = original.id(), topic = %original.topic, error = %e, "Message handler failed");
            record_failures(&original.topic, "message", 1);
            tag_failed(original, format!("{:#}", e))
        }
        Err(panic) => {
            let reason = panic_reason(panic.as_ref());
            error!(message_id = original.id(), topic = %original.topic, reason = %reason, "Message handler panicked");
            record_failures(&original.topic, "message", 1);
            tag_failed(original, reason)
        }
    }
}

/// Run `handler` on a whole batch
///
/// If the batch transform fails, every message of the batch is tagged with the error.
pub async fn process_batch(handler: &dyn MessageHandler, messages: Vec<Message>) -> Vec<Message> {
    if messages.is_empty() {
        return messages;
    }

    let original = messages.clone();
    let topic = original[0].topic.clone();

    match AssertUnwindSafe(handler.handle_batch(messages))
        .catch_unwind()
        .await
    {
        Ok(Ok(processed)) => processed,
        Ok(Err(e)) => {
            warn!(topic = %topic, size = original.len(), error = %e, "Batch handler failed");
            record_failures(&topic, "batch", original.len());
            tag_failed(original, format!("{:#}", e))
        }
        Err(panic) => {
            let reason = panic_reason(panic.as_ref());
            error!(topic = %topic, size = original.len(), reason = %reason, "Batch handler panicked");
            record_failures(&topic, "batch", original.len());
            tag_failed(original, reason)
        }
    }
}

fn record_failures(topic: &str, stage: &str, count: usize) {
    PRODUCER_METRICS
        .messages_failed
        .with_label_values(&[topic, stage])
        .inc_by(count as f64);
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(reason) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", reason)
    } else if let Some(reason) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", reason)
    } else {
        "handler panicked".to_string()
    }
}
