use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Machine not found: {0}")]
    MachineNotFound(i64),

    #[error("Invalid sensor type: {0}")]
    InvalidSensorType(String),

    #[error("Invalid machine status: {0}")]
    InvalidMachineStatus(String),

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Connectivity error: {0}")]
    ConnectivityError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] anyhow::Error),
}

impl DomainError {
    /// True for errors caused by the caller's input rather than by infrastructure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DomainError::ValidationError(_)
                | DomainError::InvalidSensorType(_)
                | DomainError::InvalidMachineStatus(_)
                | DomainError::InvalidRole(_)
                | DomainError::InvalidTimestamp(_)
                | DomainError::InvalidInterval(_)
        )
    }

    /// True for infrastructure failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DomainError::StorageError(_) | DomainError::ConnectivityError(_)
        )
    }
}
