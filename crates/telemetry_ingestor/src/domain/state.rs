use std::fmt;

/// Lifecycle of the MQTT ingestion loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestorState {
    Idle,
    Connecting,
    Subscribed,
    Running,
}

impl fmt::Display for IngestorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestorState::Idle => "idle",
            IngestorState::Connecting => "connecting",
            IngestorState::Subscribed => "subscribed",
            IngestorState::Running => "running",
        };
        f.write_str(name)
    }
}
