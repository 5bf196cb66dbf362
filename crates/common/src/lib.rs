pub mod cache;
pub mod clickhouse;
pub mod domain;
pub mod garde;
pub mod nats;
pub mod postgres;
pub mod retry;
pub mod telemetry;

pub use domain::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use cache::{MockCacheBackend, MockCacheConnector};
#[cfg(any(test, feature = "testing"))]
pub use domain::{MockMachineRepository, MockTimeSeriesStore};
