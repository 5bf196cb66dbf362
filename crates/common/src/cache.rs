mod backend;
mod cache_aside;
mod client;
mod glob;
mod in_memory;
mod metadata_cache;

pub use backend::*;
pub use cache_aside::*;
pub use client::*;
pub use glob::*;
pub use in_memory::*;
pub use metadata_cache::*;
