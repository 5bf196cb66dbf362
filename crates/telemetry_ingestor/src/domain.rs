mod ingestion_service;
mod state;
mod write_loop;

pub use ingestion_service::*;
pub use state::*;
pub use write_loop::*;
