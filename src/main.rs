use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use llm_mqtt_ingest::{
    client::ClientStartOptions,
    config::{ConfigOverrides, ConfigResolver, Settings},
    messaging::{Message, QoS, Subscription},
    observability::init_tracing,
    pipeline::{MessageHandler, PipelineRunner},
    producer::Producer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "llm-mqtt-ingest")]
#[command(about = "Demand-driven MQTT ingestion", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to CONFIG_PATH)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Topic filter to subscribe to
    #[arg(short, long)]
    topic: String,

    /// Subscription QoS level
    #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u8).range(0..=2))]
    qos: u8,

    /// Fixed client identifier
    #[arg(long)]
    client_id: Option<String>,

    /// Messages requested from the producer at a time
    #[arg(short, long, default_value = "10")]
    max_demand: usize,
}

/// Logs every message and passes it on unchanged
struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle_message(&self, message: Message) -> anyhow::Result<Message> {
        tracing::info!(
            topic = %message.topic,
            qos = message.qos.level(),
            bytes = message.payload.len(),
            payload = message.payload_str().unwrap_or("<binary>"),
            "Message received"
        );
        Ok(message)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&settings.observability);

    tracing::info!("Starting llm-mqtt-ingest v{}", env!("CARGO_PKG_VERSION"));

    if settings.observability.prometheus_enabled {
        if let Err(e) = llm_mqtt_ingest::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    let mut overrides = ConfigOverrides::new();
    if let Some(client_id) = cli.client_id {
        overrides = overrides.client_id(client_id);
    }
    let config = ConfigResolver::resolve(&settings, overrides)?;

    let qos = QoS::try_from(cli.qos).map_err(anyhow::Error::msg)?;
    let (producer, batches) = Producer::start(
        config,
        Subscription::new(cli.topic, qos),
        ClientStartOptions::default(),
    )
    .await?;

    let (output, mut processed) = mpsc::unbounded_channel();
    let runner = PipelineRunner::new(producer.clone(), batches, Arc::new(LoggingHandler))
        .with_max_demand(cli.max_demand);
    let pipeline = tokio::spawn(runner.run(output));

    let drain = tokio::spawn(async move {
        while let Some(batch) = processed.recv().await {
            let failed = batch.iter().filter(|m| m.is_failed()).count();
            tracing::debug!(size = batch.len(), failed, "Batch completed");
        }
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received");
        }
        _ = producer.wait_for_status(|status| !status.running) => {
            tracing::warn!("Producer stopped on its own");
        }
    }

    producer.shutdown().await?;
    let stats = pipeline.await??;
    drain.await?;

    tracing::info!(
        batches = stats.batches,
        messages = stats.messages,
        failed = stats.failed,
        "Shutdown complete"
    );
    Ok(())
}
