use crate::domain::MachineService;
use chrono::{DateTime, Utc};
use common::domain::{
    parse_interval, parse_timestamp, AggregatedReading, AuthContext, DomainError, DomainResult,
    HistoryQuery, Machine, Role, TimeSeriesStore, WindowInterval, DEFAULT_INTERVAL,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Raw history request; times are RFC3339 strings and `interval` a duration
/// expression such as `15m` or `1h30m`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryMachineDataInput {
    pub machine_id: i64,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineHistory {
    pub machine: Machine,
    pub interval: String,
    pub readings: Vec<AggregatedReading>,
}

/// Composes machine lookups with windowed time-series queries
pub struct QueryService {
    machines: Arc<MachineService>,
    store: Arc<dyn TimeSeriesStore>,
}

fn required_time(field: &str, raw: Option<&str>) -> DomainResult<DateTime<Utc>> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DomainError::ValidationError(format!("{} is required", field)))?;

    parse_timestamp(raw).map_err(|e| DomainError::ValidationError(format!("{}: {}", field, e)))
}

fn window_interval(raw: Option<&str>) -> DomainResult<WindowInterval> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_INTERVAL);

    parse_interval(raw).map_err(|e| DomainError::ValidationError(format!("interval: {}", e)))
}

/// Validate raw input into a store query
pub fn build_history_query(input: &QueryMachineDataInput) -> DomainResult<HistoryQuery> {
    let start = required_time("start_time", input.start_time.as_deref())?;
    let end = required_time("end_time", input.end_time.as_deref())?;
    if start >= end {
        return Err(DomainError::ValidationError(
            "start_time must be before end_time".to_string(),
        ));
    }

    Ok(HistoryQuery {
        machine_id: input.machine_id,
        start,
        end,
        interval: window_interval(input.interval.as_deref())?,
    })
}

impl QueryService {
    pub fn new(machines: Arc<MachineService>, store: Arc<dyn TimeSeriesStore>) -> Self {
        Self { machines, store }
    }

    /// Mean readings per window for one machine. Unknown machines are
    /// `MachineNotFound` even when readings exist for the id.
    #[instrument(
        skip(self, auth, input),
        fields(user = %auth.username, machine_id = input.machine_id)
    )]
    pub async fn get_machine_data(
        &self,
        auth: &AuthContext,
        input: QueryMachineDataInput,
    ) -> DomainResult<MachineHistory> {
        auth.require_role(Role::Operator)?;
        let query = build_history_query(&input)?;

        let machine = self
            .machines
            .find_machine(query.machine_id)
            .await?
            .ok_or(DomainError::MachineNotFound(query.machine_id))?;

        let interval = query.interval.to_string();
        let readings = self.store.query(query).await?;
        debug!(windows = readings.len(), "machine history loaded");

        Ok(MachineHistory {
            machine,
            interval,
            readings,
        })
    }
}
