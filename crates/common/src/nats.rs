mod client;
mod kv_cache;

pub use client::*;
pub use kv_cache::*;
