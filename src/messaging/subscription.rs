//! Subscriptions and MQTT quality-of-service levels

use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery guarantee requested for a subscription
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::EnumIter,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// Fire and forget
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible
    AtLeastOnce,
    /// Four-step handshake, no duplicates
    ExactlyOnce,
}

impl QoS {
    /// Numeric level as used on the wire
    pub fn level(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("invalid qos level {}, expected 0, 1 or 2", other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos.level()
    }
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<rumqttc::QoS> for QoS {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// One logical inbound stream
///
/// Buffers are keyed by `topic`, so two subscriptions to the same topic share a queue
/// regardless of their qos.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            qos,
        }
    }

    /// Whether a concrete publish topic is covered by this subscription's filter
    pub fn matches(&self, topic: &str) -> bool {
        topic_matches(&self.topic, topic)
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (qos {})", self.topic, self.qos)
    }
}

/// MQTT topic filter matching with `+` (single level) and `#` (multi level) wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    // Wildcards never match topics reserved with a leading '$'
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_qos_round_trip_levels() {
        for qos in QoS::iter() {
            assert_eq!(QoS::try_from(qos.level()).unwrap(), qos);
        }
        assert!(QoS::try_from(3).is_err());
    }

    #[test]
    fn test_qos_deserializes_from_number() {
        let sub: Subscription =
            serde_json::from_str(r#"{"topic":"sensors/temp","qos":1}"#).unwrap();
        assert_eq!(sub.qos, QoS::AtLeastOnce);
        assert!(serde_json::from_str::<Subscription>(r#"{"topic":"a","qos":7}"#).is_err());
    }

    #[test]
    fn test_topic_matches_exact() {
        assert!(topic_matches("sensors/temp", "sensors/temp"));
        assert!(!topic_matches("sensors/temp", "sensors/humidity"));
        assert!(!topic_matches("sensors/temp", "sensors/temp/raw"));
    }

    #[test]
    fn test_topic_matches_wildcards() {
        assert!(topic_matches("sensors/+", "sensors/temp"));
        assert!(!topic_matches("sensors/+", "sensors/temp/raw"));
        assert!(topic_matches("sensors/#", "sensors/temp/raw"));
        assert!(topic_matches("sensors/#", "sensors"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("#", "$SYS/broker/uptime"));
    }
}
