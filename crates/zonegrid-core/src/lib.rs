pub mod config;
pub mod types;

pub use config::ZoneGridConfig;
pub use types::*;
