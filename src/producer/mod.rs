//! Demand-driven producer
//!
//! A producer bridges one subscription into the pipeline. It starts (or attaches to) the
//! topic's buffer queue, starts the transport client that fills it, and then hands out
//! messages only as fast as the pipeline asks for them.
//!
//! # State machine
//!
//! ```text
//!            ask(d)                      dequeue == demand
//!   Idle ───────────► dequeue ─────────────────────────────► Idle
//!                        │
//!                        ├── 0 < dequeued < demand ──► Draining ─(zero delay)─► dequeue
//!                        │
//!                        └── nothing dequeued ──► AwaitingMessages ─(interval)─► dequeue
//! ```
//!
//! All state lives in one task; demand, timer fires and shutdown arrive as events on a
//! single channel and are handled strictly in order.
//!
//! # Example
//!
//! ```rust,no_run
//! use llm_mqtt_ingest::client::ClientStartOptions;
//! use llm_mqtt_ingest::config::{ConfigOverrides, ConfigResolver, Settings};
//! use llm_mqtt_ingest::messaging::{QoS, Subscription};
//! use llm_mqtt_ingest::producer::Producer;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let settings = Settings::load(None)?;
//! let config = ConfigResolver::resolve(&settings, ConfigOverrides::new())?;
//! let (producer, mut batches) = Producer::start(
//!     config,
//!     Subscription::new("sensors/temp", QoS::AtLeastOnce),
//!     ClientStartOptions::default(),
//! )
//! .await?;
//!
//! producer.ask(10)?;
//! while let Some(batch) = batches.recv().await {
//!     println!("received {} messages", batch.len());
//!     producer.ask(batch.len())?;
//! }
//! # Ok(())
//! # }
//! ```

mod core;
mod error;
mod state;

pub use self::core::{Batches, Producer, ProducerHandle};
pub use error::{ProducerError, ProducerResult};
pub use state::{DemandState, ProducerStatus};
