use crate::mqtt::ParsedTopic;
use chrono::{DateTime, Utc};
use common::domain::{parse_timestamp, IngestionBatch, SensorReading};
use serde_json::{Map, Value};
use thiserror::Error;

const REQUIRED_FIELDS: [&str; 4] = ["sensor_type", "value", "timestamp", "unit"];

/// Why an inbound telemetry message was discarded
#[derive(Debug, Error, PartialEq)]
pub enum MessageRejection {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> MessageRejection {
    MessageRejection::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn required_string(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<String, MessageRejection> {
    match object.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(invalid(field, "must not be empty")),
        _ => Err(invalid(field, "expected a string")),
    }
}

/// Numbers and numeric strings are accepted
fn reading_value(object: &Map<String, Value>) -> Result<f64, MessageRejection> {
    let value = match object.get("value") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid("value", "expected a number"))?;

    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid("value", "must be finite"))
    }
}

/// Integers, plus floats with no fractional part such as `7.0`
fn integral(n: &serde_json::Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

/// Machine id from the payload when present, otherwise from the topic
fn machine_id(object: &Map<String, Value>, topic: &ParsedTopic) -> Result<i64, MessageRejection> {
    match object.get("machine_id") {
        None | Some(Value::Null) => topic.machine_id.parse::<i64>().map_err(|_| {
            invalid(
                "machine_id",
                format!("topic segment '{}' is not an integer", topic.machine_id),
            )
        }),
        Some(Value::Number(n)) => {
            integral(n).ok_or_else(|| invalid("machine_id", format!("{} is not an integer", n)))
        }
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid("machine_id", format!("'{}' is not an integer", s))),
        Some(other) => Err(invalid("machine_id", format!("unexpected value {}", other))),
    }
}

/// Turn one MQTT message into a single-reading batch attributed to the
/// topic's factory.
pub fn decode_message(
    topic: &ParsedTopic,
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> Result<IngestionBatch, MessageRejection> {
    let decoded: Value =
        serde_json::from_slice(payload).map_err(|e| MessageRejection::Malformed(e.to_string()))?;
    let Value::Object(object) = decoded else {
        return Err(MessageRejection::NotAnObject);
    };

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| matches!(object.get(**field), None | Some(Value::Null)))
        .map(|field| field.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(MessageRejection::MissingFields(missing));
    }

    let timestamp = match object.get("timestamp") {
        Some(Value::String(raw)) => {
            parse_timestamp(raw).map_err(|e| invalid("timestamp", e.to_string()))?
        }
        _ => return Err(invalid("timestamp", "expected an ISO-8601 string")),
    };

    let reading = SensorReading {
        machine_id: machine_id(&object, topic)?,
        sensor_type: required_string(&object, "sensor_type")?,
        value: reading_value(&object)?,
        unit: required_string(&object, "unit")?,
        timestamp,
    };

    IngestionBatch::new(topic.factory_id.clone(), received_at, vec![reading])
        .map_err(|e| invalid("data", e.to_string()))
}
