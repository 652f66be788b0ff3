pub mod app_config;
pub mod constants;
pub mod error;
pub mod helpers;
pub mod logger;

pub use app_config::{AppConfig, TargetConfig, TargetKind};
pub use constants::*;
pub use error::OpsError;
pub use helpers::*;
