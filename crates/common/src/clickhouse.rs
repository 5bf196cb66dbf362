mod client;
mod sensor_data_store;

pub use client::*;
pub use sensor_data_store::*;
