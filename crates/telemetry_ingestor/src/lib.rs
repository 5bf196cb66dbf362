mod domain;
pub mod mqtt;
mod telemetry_ingestor;

pub use domain::*;
pub use telemetry_ingestor::*;
