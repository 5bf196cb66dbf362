mod client;
mod config;
mod machine_repository;

pub use client::*;
pub use config::*;
pub use machine_repository::*;
