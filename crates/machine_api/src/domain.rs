mod machine_service;
mod query_service;

pub use machine_service::*;
pub use query_service::*;
