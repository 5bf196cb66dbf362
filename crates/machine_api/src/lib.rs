pub mod domain;
pub mod machine_api;

pub use domain::*;
pub use machine_api::*;
