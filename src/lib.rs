//! Demand-driven MQTT ingestion
//!
//! Bridges topic subscriptions into a pull-based batch pipeline. Inbound publishes are
//! buffered in a topic-keyed queue that outlives any single producer; a producer hands
//! messages to the pipeline only as the pipeline asks for them.
//!
//! ```text
//! TransportClient ──enqueue──► BufferQueue ──dequeue──► Producer ──batches──► Pipeline
//!                                                           ▲                     │
//!                                                           └────── ask(n) ───────┘
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod messaging;
pub mod metrics;
pub mod observability;
pub mod pipeline;
pub mod producer;
pub mod queue;

pub use error::{AppError, Result};
