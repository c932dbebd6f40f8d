pub mod config;
pub mod error;
pub mod types;

pub use config::GatewayConfig;
pub use error::{DavenportError, Result};
pub use types::*;
