//! Failure tagging for in-flight messages

use crate::messaging::{Message, MessageStatus};
use std::fmt;

/// Items that can be marked as failed
pub trait FailureTag: Sized {
    /// Mark every item as failed with `reason`
    fn tag_failed(self, reason: &str) -> Self;
}

impl FailureTag for Message {
    fn tag_failed(mut self, reason: &str) -> Self {
        self.status = MessageStatus::Failed {
            reason: reason.to_string(),
        };
        self
    }
}

impl FailureTag for Vec<Message> {
    fn tag_failed(self, reason: &str) -> Self {
        self.into_iter()
            .map(|message| message.tag_failed(reason))
            .collect()
    }
}

/// Mark a message or a batch as failed with `error`
pub fn tag_failed<T: FailureTag>(items: T, error: impl fmt::Display) -> T {
    items.tag_failed(&error.to_string())
}
