//! Minimal demand-driving consumer for a producer

use crate::messaging::Message;
use crate::pipeline::handler::{process_batch, process_message, MessageHandler};
use crate::producer::{Batches, ProducerHandle, ProducerResult};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Default number of messages requested up front
pub const DEFAULT_MAX_DEMAND: usize = 10;

/// Counters reported when a runner finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub batches: usize,
    pub messages: usize,
    pub failed: usize,
}

/// Pulls batches from a producer, runs the handler boundary on them and forwards the
/// results
///
/// The runner asks for `max_demand` messages once and then re-asks for exactly as many
/// messages as each batch contained, so outstanding demand never exceeds `max_demand`.
pub struct PipelineRunner {
    producer: ProducerHandle,
    batches: Batches,
    handler: Arc<dyn MessageHandler>,
    max_demand: usize,
}

impl PipelineRunner {
    pub fn new(producer: ProducerHandle, batches: Batches, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            producer,
            batches,
            handler,
            max_demand: DEFAULT_MAX_DEMAND,
        }
    }

    pub fn with_max_demand(mut self, max_demand: usize) -> Self {
        self.max_demand = max_demand.max(1);
        self
    }

    /// Run until the producer stops or `output` is closed
    ///
    /// Processed batches are sent on `output`. When `output` is closed the producer is
    /// shut down. Errors that stopped the producer are returned.
    pub async fn run(mut self, output: mpsc::UnboundedSender<Vec<Message>>) -> ProducerResult<PipelineStats> {
        let mut stats = PipelineStats::default();

        info!(
            client_id = self.producer.client_id(),
            queue = %self.producer.queue_name(),
            max_demand = self.max_demand,
            "Pipeline running"
        );

        if self.producer.ask(self.max_demand).is_err() {
            return self.producer.join().await.map(|_| stats);
        }

        while let Some(batch) = self.batches.recv().await {
            let received = batch.len();
            let handler = self.handler.as_ref();

            let processed: Vec<Message> =
                futures::future::join_all(batch.into_iter().map(|m| process_message(handler, m)))
                    .await;
            let processed = process_batch(handler, processed).await;

            stats.batches += 1;
            stats.messages += received;
            stats.failed += processed.iter().filter(|m| m.is_failed()).count();
            debug!(received, failed = stats.failed, "Batch processed");

            if output.send(processed).is_err() {
                info!("Pipeline output closed, shutting down producer");
                self.producer.shutdown().await?;
                return Ok(stats);
            }

            // Producer may already be stopping; remaining batches are still drained
            let _ = self.producer.ask(received);
        }

        self.producer.join().await?;
        info!(
            batches = stats.batches,
            messages = stats.messages,
            failed = stats.failed,
            "Pipeline finished"
        );
        Ok(stats)
    }
}
