//! Prometheus metrics for the ingestion producer
//!
//! Metrics live in a dedicated registry so that embedding applications can expose them
//! next to their own. Call [`init_metrics`] once at startup before scraping.

use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};

const NAMESPACE: &str = "llm_mqtt_ingest";

/// Producer and queue metrics
pub struct ProducerMetrics {
    /// Messages accepted by a buffer queue
    pub messages_enqueued: CounterVec,

    /// Messages discarded by a full bounded queue
    pub messages_dropped: CounterVec,

    /// Messages handed to the pipeline
    pub messages_delivered: CounterVec,

    /// Messages tagged as failed at the handler boundary
    pub messages_failed: CounterVec,

    /// Demand requested by the pipeline but not yet satisfied
    pub demand_outstanding: GaugeVec,

    /// Dequeue attempts by outcome (empty, partial, full)
    pub dequeue_attempts: CounterVec,

    /// Transport client sessions currently started
    pub active_sessions: GaugeVec,
}

fn counter(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    CounterVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)
        .expect("metric options are static and valid")
}

fn gauge(name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)
        .expect("metric options are static and valid")
}

lazy_static! {
    /// Registry holding every metric of this crate
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    pub static ref PRODUCER_METRICS: ProducerMetrics = ProducerMetrics {
        messages_enqueued: counter(
            "messages_enqueued_total",
            "Total number of messages buffered",
            &["topic"]
        ),
        messages_dropped: counter(
            "messages_dropped_total",
            "Total number of messages dropped by a full queue",
            &["topic", "policy"]
        ),
        messages_delivered: counter(
            "messages_delivered_total",
            "Total number of messages delivered to the pipeline",
            &["topic"]
        ),
        messages_failed: counter(
            "messages_failed_total",
            "Total number of messages failed by a handler",
            &["topic", "stage"]
        ),
        demand_outstanding: gauge(
            "demand_outstanding",
            "Pipeline demand not yet satisfied",
            &["topic"]
        ),
        dequeue_attempts: counter(
            "dequeue_attempts_total",
            "Total number of dequeue attempts by outcome",
            &["topic", "outcome"]
        ),
        active_sessions: gauge(
            "client_sessions_active",
            "Number of started transport client sessions",
            &["client"]
        ),
    };
}

/// Register all metrics with [`PROMETHEUS_REGISTRY`]
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let metrics = &*PRODUCER_METRICS;

    PROMETHEUS_REGISTRY.register(Box::new(metrics.messages_enqueued.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(metrics.messages_dropped.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(metrics.messages_delivered.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(metrics.messages_failed.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(metrics.demand_outstanding.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(metrics.dequeue_attempts.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(metrics.active_sessions.clone()))?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Render the registry in the Prometheus text exposition format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
