pub mod config;
pub mod error;
pub mod types;

pub use config::{CorrelationConfig, EngineConfig};
pub use error::TraceryError;
pub use types::*;
