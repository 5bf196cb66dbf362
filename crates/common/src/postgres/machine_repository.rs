use crate::domain::{
    CreateMachineInput, DomainError, DomainResult, Machine, MachineRepository, UpdateMachineInput,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::{debug, info, instrument};

const MACHINE_COLUMNS: &str = "id, name, location, sensor_type, status, created_at, updated_at";

/// Machine row as stored in `machine_metadata`
#[derive(Debug, Clone)]
pub struct MachineRow {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub sensor_type: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&Row> for MachineRow {
    type Error = tokio_postgres::Error;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(MachineRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            location: row.try_get("location")?,
            sensor_type: row.try_get("sensor_type")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<MachineRow> for Machine {
    type Error = DomainError;

    fn try_from(row: MachineRow) -> Result<Self, Self::Error> {
        Ok(Machine {
            id: row.id,
            name: row.name,
            location: row.location,
            sensor_type: row.sensor_type.parse()?,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn storage_error(e: tokio_postgres::Error) -> DomainError {
    DomainError::StorageError(e.into())
}

fn to_machine(row: &Row) -> DomainResult<Machine> {
    MachineRow::try_from(row).map_err(storage_error)?.try_into()
}

#[derive(Clone)]
pub struct PostgresMachineRepository {
    client: PostgresClient,
}

impl PostgresMachineRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }

    async fn connection(&self) -> DomainResult<deadpool_postgres::Client> {
        self.client
            .get_connection()
            .await
            .map_err(|e| DomainError::ConnectivityError(format!("{:#}", e)))
    }
}

/// Column assignments for the fields present in `input`
fn update_assignments(input: &UpdateMachineInput) -> Vec<(&'static str, String)> {
    let mut assignments = Vec::new();
    if let Some(name) = &input.name {
        assignments.push(("name", name.clone()));
    }
    if let Some(location) = &input.location {
        assignments.push(("location", location.clone()));
    }
    if let Some(sensor_type) = input.sensor_type {
        assignments.push(("sensor_type", sensor_type.as_str().to_string()));
    }
    if let Some(status) = input.status {
        assignments.push(("status", status.as_str().to_string()));
    }
    assignments
}

/// `UPDATE` binding each assignment in order, then the id as the last parameter
fn update_query(assignments: &[(&'static str, String)]) -> String {
    let mut query = String::from("UPDATE machine_metadata SET updated_at = NOW()");
    for (idx, (column, _)) in assignments.iter().enumerate() {
        query.push_str(&format!(", {} = ${}", column, idx + 1));
    }
    query.push_str(&format!(
        " WHERE id = ${} RETURNING {}",
        assignments.len() + 1,
        MACHINE_COLUMNS
    ));
    query
}

#[async_trait]
impl MachineRepository for PostgresMachineRepository {
    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn create_machine(&self, input: CreateMachineInput) -> DomainResult<Machine> {
        let mut conn = self.connection().await?;
        let tx = conn.transaction().await.map_err(storage_error)?;

        let row = tx
            .query_one(
                &format!(
                    "INSERT INTO machine_metadata (name, location, sensor_type, status)
                     VALUES ($1, $2, $3, $4)
                     RETURNING {}",
                    MACHINE_COLUMNS
                ),
                &[
                    &input.name,
                    &input.location,
                    &input.sensor_type.as_str(),
                    &input.status.as_str(),
                ],
            )
            .await
            .map_err(storage_error)?;
        let machine = to_machine(&row)?;

        tx.commit().await.map_err(storage_error)?;

        info!(machine_id = machine.id, "machine created in database");
        Ok(machine)
    }

    #[instrument(skip(self))]
    async fn get_machine(&self, machine_id: i64) -> DomainResult<Option<Machine>> {
        let conn = self.connection().await?;

        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM machine_metadata WHERE id = $1",
                    MACHINE_COLUMNS
                ),
                &[&machine_id],
            )
            .await
            .map_err(storage_error)?;

        row.as_ref().map(to_machine).transpose()
    }

    #[instrument(skip(self))]
    async fn list_machines(&self) -> DomainResult<Vec<Machine>> {
        let conn = self.connection().await?;

        let rows = conn
            .query(
                &format!("SELECT {} FROM machine_metadata ORDER BY id", MACHINE_COLUMNS),
                &[],
            )
            .await
            .map_err(storage_error)?;

        debug!(count = rows.len(), "listed machines");
        rows.iter().map(to_machine).collect()
    }

    #[instrument(skip(self, input), fields(machine_id = input.machine_id))]
    async fn update_machine(&self, input: UpdateMachineInput) -> DomainResult<Option<Machine>> {
        let mut conn = self.connection().await?;
        let tx = conn.transaction().await.map_err(storage_error)?;

        let assignments = update_assignments(&input);
        let query = update_query(&assignments);
        let mut params: Vec<&(dyn ToSql + Sync)> = assignments
            .iter()
            .map(|(_, value)| value as &(dyn ToSql + Sync))
            .collect();
        params.push(&input.machine_id);

        let row = tx.query_opt(&query, &params).await.map_err(storage_error)?;
        let Some(row) = row else {
            // Nothing written; dropping the transaction rolls it back
            debug!("machine not found for update");
            return Ok(None);
        };
        let machine = to_machine(&row)?;

        tx.commit().await.map_err(storage_error)?;

        info!(machine_id = machine.id, "machine updated in database");
        Ok(Some(machine))
    }

    #[instrument(skip(self))]
    async fn delete_machine(&self, machine_id: i64) -> DomainResult<bool> {
        let mut conn = self.connection().await?;
        let tx = conn.transaction().await.map_err(storage_error)?;

        let deleted = tx
            .execute("DELETE FROM machine_metadata WHERE id = $1", &[&machine_id])
            .await
            .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;

        if deleted > 0 {
            info!("machine deleted from database");
        }
        Ok(deleted > 0)
    }
}
