mod payload;
pub(crate) mod subscriber;
mod topic;

pub use payload::{decode_message, MessageRejection};
pub use subscriber::{run_mqtt_subscriber, MqttSubscriberConfig};
pub use topic::{parse_topic, ParsedTopic, TELEMETRY_SUBSCRIPTION};
