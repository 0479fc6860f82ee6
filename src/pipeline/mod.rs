//! Pipeline side of the producer
//!
//! Handler boundary, failure tagging and a small runner that drives a producer by demand.

mod failure;
mod handler;
mod runner;

pub use failure::{tag_failed, FailureTag};
pub use handler::{process_batch, process_message, MessageHandler};
pub use runner::{PipelineRunner, PipelineStats, DEFAULT_MAX_DEMAND};
