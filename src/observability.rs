//! Logging setup and log-safe connection metadata

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Replacement text for sensitive values
pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEYS: &[&str] = &["password", "passwd", "secret", "token", "api_key", "private_key"];

/// Whether values stored under `key` must never be logged in clear text
pub fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|sensitive| key.contains(sensitive))
}

/// Key/value context attached to log records
///
/// Values inserted under a sensitive key are replaced with [`REDACTED`] on insertion, so
/// the clear-text value never reaches the map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LogMetadata(BTreeMap<String, String>);

impl LogMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = if is_sensitive(&key) {
            REDACTED.to_string()
        } else {
            value.to_string()
        };
        self.0.insert(key, value);
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LogMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}

/// Logging and metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON log lines instead of the human-readable format
    #[serde(default)]
    pub json_logs: bool,

    /// Register Prometheus metrics at startup
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

fn default_log_filter() -> String {
    "llm_mqtt_ingest=info".to_string()
}

fn default_true() -> bool {
    true
}

/// Install the global tracing subscriber
pub fn init_tracing(settings: &ObservabilitySettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_filter.clone()));

    if settings.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
