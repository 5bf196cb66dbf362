/// Wildcard subscription covering every machine of every factory
pub const TELEMETRY_SUBSCRIPTION: &str = "factory/+/machine/+/telemetry";

const UNKNOWN_SEGMENT: &str = "unknown";

/// Identifiers taken from `factory/{factory_id}/machine/{machine_id}/telemetry`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub factory_id: String,
    pub machine_id: String,
}

/// Extract factory and machine segments. Missing segments become `"unknown"`;
/// the topic shape alone never rejects a message.
pub fn parse_topic(topic: &str) -> ParsedTopic {
    let parts: Vec<&str> = topic.split('/').collect();
    let segment = |idx: usize| parts.get(idx).copied().unwrap_or(UNKNOWN_SEGMENT).to_string();

    ParsedTopic {
        factory_id: segment(1),
        machine_id: segment(3),
    }
}
