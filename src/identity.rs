//! Client identifier resolution
//!
//! Brokers evict an existing connection when a second one arrives with the same client
//! identifier, so prefix-derived identifiers must never repeat within a process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SUFFIX: AtomicU64 = AtomicU64::new(1);

/// How a producer identifies itself to the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientIdentity {
    /// Use exactly this identifier
    Fixed(String),
    /// Derive `prefix_<unique suffix>` on every resolution
    Prefix(String),
}

impl ClientIdentity {
    /// Produce the identifier to connect with
    pub fn resolve(&self) -> String {
        match self {
            ClientIdentity::Fixed(id) => id.clone(),
            ClientIdentity::Prefix(prefix) => unique_client_id(prefix),
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, ClientIdentity::Fixed(_))
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientIdentity::Fixed(id) => write!(f, "{}", id),
            ClientIdentity::Prefix(prefix) => write!(f, "{}_*", prefix),
        }
    }
}

/// `prefix_<pid>-<counter>`; the counter is process-wide and never reused
pub fn unique_client_id(prefix: &str) -> String {
    let n = NEXT_SUFFIX.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}-{}", prefix, std::process::id(), n)
}
