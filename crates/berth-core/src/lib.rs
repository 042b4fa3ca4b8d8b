pub mod config;
pub mod names;
pub mod types;

pub use config::NodeConfig;
pub use types::*;
