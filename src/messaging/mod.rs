//! Message and subscription types shared by transports, queues and the pipeline

mod message;
mod subscription;

pub use message::{Message, MessageMetadata, MessageStatus};
pub use subscription::{topic_matches, QoS, Subscription};
