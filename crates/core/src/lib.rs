pub mod config;
pub mod error;
pub mod snapshot;

pub use config::EngineConfig;
pub use error::*;
pub use snapshot::*;
