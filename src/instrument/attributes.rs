//! Messaging span attributes.

use opentelemetry::KeyValue;

use crate::broker::Message;
use crate::config::BrokerConfig;
use crate::propagation::Baggage;

pub use opentelemetry_semantic_conventions::attribute::{
    ERROR_TYPE, MESSAGING_CONSUMER_GROUP_NAME, MESSAGING_DESTINATION_NAME,
    MESSAGING_DESTINATION_PARTITION_ID, MESSAGING_KAFKA_MESSAGE_KEY, MESSAGING_KAFKA_OFFSET,
    MESSAGING_MESSAGE_BODY_SIZE, MESSAGING_MESSAGE_ID, MESSAGING_OPERATION_TYPE, MESSAGING_SYSTEM,
    SERVER_ADDRESS,
};

/// Metric-only attribute naming the span operation.
pub const OPERATION_NAME: &str = "operation.name";

/// Span name for consuming from `topic`.
pub fn receive_span_name(topic: &str) -> String {
    format!("receive {topic}")
}

/// Span name for producing to `topic`.
pub fn send_span_name(topic: &str) -> String {
    format!("send {topic}")
}

/// Attributes of a `receive` span, followed by `extra`.
pub fn consumer_attributes(message: &Message, system: &str, extra: &[KeyValue]) -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new(MESSAGING_OPERATION_TYPE, "receive"),
        KeyValue::new(MESSAGING_SYSTEM, system.to_string()),
        KeyValue::new(MESSAGING_DESTINATION_NAME, message.topic.clone()),
        KeyValue::new(MESSAGING_KAFKA_MESSAGE_KEY, message.key_str().into_owned()),
        KeyValue::new(MESSAGING_MESSAGE_BODY_SIZE, message.body_size() as i64),
    ];
    if let Some(offset) = message.offset {
        attrs.push(KeyValue::new(MESSAGING_KAFKA_OFFSET, offset));
        attrs.push(KeyValue::new(MESSAGING_MESSAGE_ID, offset.to_string()));
    }
    if let Some(partition) = message.partition {
        attrs.push(KeyValue::new(
            MESSAGING_DESTINATION_PARTITION_ID,
            partition.to_string(),
        ));
    }
    attrs.extend_from_slice(extra);
    attrs
}

/// Attributes of a `send` span, followed by `extra`.
pub fn producer_attributes(message: &Message, system: &str, extra: &[KeyValue]) -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new(MESSAGING_OPERATION_TYPE, "publish"),
        KeyValue::new(MESSAGING_SYSTEM, system.to_string()),
        KeyValue::new(MESSAGING_DESTINATION_NAME, message.topic.clone()),
        KeyValue::new(MESSAGING_KAFKA_MESSAGE_KEY, message.key_str().into_owned()),
        KeyValue::new(MESSAGING_MESSAGE_BODY_SIZE, message.body_size() as i64),
    ];
    attrs.extend_from_slice(extra);
    attrs
}

/// Connection attributes derived from broker settings: consumer group and
/// bootstrap servers, each omitted when empty.
pub fn broker_attributes(broker: &BrokerConfig) -> Vec<KeyValue> {
    let mut attrs = Vec::new();
    if !broker.group_id.is_empty() {
        attrs.push(KeyValue::new(
            MESSAGING_CONSUMER_GROUP_NAME,
            broker.group_id.clone(),
        ));
    }
    if !broker.bootstrap_servers.is_empty() {
        attrs.push(KeyValue::new(SERVER_ADDRESS, broker.bootstrap_servers.clone()));
    }
    attrs
}

/// Baggage members named in `keys`, copied onto a span under their own
/// names. Keys missing from `baggage` are skipped.
pub fn baggage_attributes(baggage: &Baggage, keys: &[String]) -> Vec<KeyValue> {
    keys.iter()
        .filter_map(|key| {
            baggage
                .get(key)
                .map(|value| KeyValue::new(key.clone(), value.to_string()))
        })
        .collect()
}

/// Histogram attributes shared by consumer and producer measurements.
pub fn duration_attributes(operation: &str, system: &str, topic: &str) -> Vec<KeyValue> {
    vec![
        KeyValue::new(OPERATION_NAME, operation.to_string()),
        KeyValue::new(MESSAGING_SYSTEM, system.to_string()),
        KeyValue::new(MESSAGING_DESTINATION_NAME, topic.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of(attrs: &[KeyValue], key: &str) -> Option<String> {
        attrs
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.as_str().into_owned())
    }

    #[test]
    fn test_consumer_attributes_include_position() {
        let mut msg = Message::new("ratings", "{}")
            .with_key("k1")
            .with_header("h", "vv");
        msg.partition = Some(2);
        msg.offset = Some(41);

        let attrs = consumer_attributes(&msg, "kafka", &[KeyValue::new("team", "core")]);
        assert_eq!(value_of(&attrs, MESSAGING_OPERATION_TYPE).as_deref(), Some("receive"));
        assert_eq!(value_of(&attrs, MESSAGING_MESSAGE_ID).as_deref(), Some("41"));
        assert_eq!(value_of(&attrs, MESSAGING_KAFKA_OFFSET).as_deref(), Some("41"));
        assert_eq!(value_of(&attrs, MESSAGING_DESTINATION_PARTITION_ID).as_deref(), Some("2"));
        assert_eq!(value_of(&attrs, MESSAGING_MESSAGE_BODY_SIZE).as_deref(), Some("7"));
        assert_eq!(attrs.last().map(|kv| kv.key.as_str()), Some("team"));
    }

    #[test]
    fn test_producer_attributes_have_no_position() {
        let msg = Message::new("movies", "x");
        let attrs = producer_attributes(&msg, "kafka", &[]);
        assert_eq!(value_of(&attrs, MESSAGING_OPERATION_TYPE).as_deref(), Some("publish"));
        assert!(value_of(&attrs, MESSAGING_MESSAGE_ID).is_none());
    }

    #[test]
    fn test_baggage_attributes_only_copy_configured_keys() {
        let baggage: Baggage = [("tenant", "acme"), ("session", "s-1")].into_iter().collect();
        let keys = vec!["tenant".to_string(), "region".to_string()];

        let attrs = baggage_attributes(&baggage, &keys);
        assert_eq!(attrs.len(), 1);
        assert_eq!(value_of(&attrs, "tenant").as_deref(), Some("acme"));
        assert!(value_of(&attrs, "session").is_none());
    }

    #[test]
    fn test_broker_attributes() {
        let broker = BrokerConfig {
            group_id: String::new(),
            ..BrokerConfig::default()
        };
        let attrs = broker_attributes(&broker);
        assert_eq!(attrs.len(), 1);
        assert_eq!(value_of(&attrs, SERVER_ADDRESS).as_deref(), Some("localhost:9092"));
    }
}
