mod auth;
mod interval;
mod machine;
mod reading;
mod result;
mod timestamp;

pub use auth::*;
pub use interval::*;
pub use machine::*;
pub use reading::*;
pub use result::*;
pub use timestamp::*;
