use aws_lambda_events::event::eventbridge::EventBridgeEvent;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::aggregate::MetricsAggregate;

/// What started an extractor invocation. The payload itself carries no input.
#[derive(Debug)]
pub enum Trigger {
    Scheduled(EventBridgeEvent<Value>),
    Manual(Value),
}

impl From<Value> for Trigger {
    fn from(raw_value: Value) -> Self {
        debug!("raw_value: {:?}", raw_value);
        if let Ok(event) = EventBridgeEvent::<Value>::deserialize(&raw_value) {
            tracing::info!("scheduled event detected");
            return Trigger::Scheduled(event);
        }
        tracing::info!("manual invocation detected");
        Trigger::Manual(raw_value)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PayloadError {
    #[error("aggregate payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("aggregate payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Decodes the notifier payload into an aggregate.
///
/// The extractor sends the aggregate as a JSON object, but a string holding the
/// encoded object is accepted too, as produced by some manual test invocations.
pub fn decode_aggregate(payload: Value) -> Result<MetricsAggregate, PayloadError> {
    match payload {
        Value::Object(map) => Ok(MetricsAggregate::from(map)),
        Value::String(encoded) => match serde_json::from_str::<Value>(&encoded)? {
            Value::Object(map) => Ok(MetricsAggregate::from(map)),
            other => Err(PayloadError::NotAnObject(kind(&other))),
        },
        other => Err(PayloadError::NotAnObject(kind(&other))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scheduled_trigger() {
        let raw = json!({
            "version": "0",
            "id": "53dc4d37-cffa-4f76-80c9-8b7d4a4d2eaa",
            "detail-type": "Scheduled Event",
            "source": "aws.events",
            "account": "123456789012",
            "time": "2026-10-17T07:00:00Z",
            "region": "us-west-2",
            "resources": ["arn:aws:events:us-west-2:123456789012:rule/daily-stats"],
            "detail": {}
        });
        assert!(matches!(Trigger::from(raw), Trigger::Scheduled(_)));
    }

    #[test]
    fn test_manual_trigger() {
        assert!(matches!(Trigger::from(json!("run")), Trigger::Manual(_)));
    }

    #[test]
    fn test_decode_object_payload() {
        let aggregate = decode_aggregate(json!({"daily": {"signups": 10}})).unwrap();
        assert_eq!(aggregate.get("daily"), Some(&json!({"signups": 10})));
    }

    #[test]
    fn test_decode_string_encoded_payload() {
        let aggregate =
            decode_aggregate(json!(r#"{"coupons": {"SAVE10": 5}}"#)).unwrap();
        assert_eq!(aggregate.get("coupons"), Some(&json!({"SAVE10": 5})));
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        assert!(matches!(
            decode_aggregate(json!([1, 2])),
            Err(PayloadError::NotAnObject("an array"))
        ));
        assert!(matches!(
            decode_aggregate(json!("[1, 2]")),
            Err(PayloadError::NotAnObject("an array"))
        ));
        assert!(matches!(
            decode_aggregate(json!("{not json")),
            Err(PayloadError::InvalidJson(_))
        ));
    }
}
