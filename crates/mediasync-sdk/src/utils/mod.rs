//! 通用工具

pub mod logging;
pub mod time;

pub use logging::init_tracing;
pub use time::now_millis;
