use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of sensor a machine is fitted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Temperature,
    Pressure,
    Speed,
    Vibration,
}

impl SensorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Pressure => "pressure",
            SensorType::Speed => "speed",
            SensorType::Vibration => "vibration",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" => Ok(SensorType::Temperature),
            "pressure" => Ok(SensorType::Pressure),
            "speed" => Ok(SensorType::Speed),
            "vibration" => Ok(SensorType::Vibration),
            other => Err(DomainError::InvalidSensorType(other.to_string())),
        }
    }
}

/// Operational status of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Active => "active",
            MachineStatus::Inactive => "inactive",
            MachineStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MachineStatus::Active),
            "inactive" => Ok(MachineStatus::Inactive),
            "maintenance" => Ok(MachineStatus::Maintenance),
            other => Err(DomainError::InvalidMachineStatus(other.to_string())),
        }
    }
}

/// Domain entity for a machine's metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub sensor_type: SensorType,
    pub status: MachineStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a machine. The id is assigned by the store.
#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
pub struct CreateMachineInput {
    #[garde(length(min = 1, max = 255))]
    pub name: String,
    #[garde(length(min = 1, max = 255))]
    pub location: String,
    #[garde(skip)]
    pub sensor_type: SensorType,
    #[serde(default)]
    #[garde(skip)]
    pub status: MachineStatus,
}

/// Partial update of a machine; `None` fields are left untouched
#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
pub struct UpdateMachineInput {
    #[garde(skip)]
    pub machine_id: i64,
    #[serde(default)]
    #[garde(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[serde(default)]
    #[garde(length(min = 1, max = 255))]
    pub location: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub sensor_type: Option<SensorType>,
    #[serde(default)]
    #[garde(skip)]
    pub status: Option<MachineStatus>,
}

impl UpdateMachineInput {
    pub fn has_changes(&self) -> bool {
        self.name.is_some()
            || self.location.is_some()
            || self.sensor_type.is_some()
            || self.status.is_some()
    }
}

/// Repository trait for machine metadata storage operations.
///
/// Each call runs as its own transaction; implementations must not touch
/// the metadata cache.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MachineRepository: Send + Sync {
    /// Insert a machine and return the committed row
    async fn create_machine(&self, input: CreateMachineInput) -> DomainResult<Machine>;

    async fn get_machine(&self, machine_id: i64) -> DomainResult<Option<Machine>>;

    /// All machines ordered by id
    async fn list_machines(&self) -> DomainResult<Vec<Machine>>;

    /// Apply a partial update; `None` when no machine has the given id
    async fn update_machine(&self, input: UpdateMachineInput) -> DomainResult<Option<Machine>>;

    /// Returns false when no machine has the given id
    async fn delete_machine(&self, machine_id: i64) -> DomainResult<bool>;
}
