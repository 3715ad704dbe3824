pub mod config;
pub mod constants;
pub mod errors;

pub use config::{AppConfig, DatabaseConfig, LogConfig, ServerConfig, TriggerPoolConfig};
pub use errors::{JobCenterError, JobCenterResult};
