pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::CliConfig;
pub use crate::config::{EngineConfig, PlatformConfig};

pub use crate::core::{
    AttributeResolver, BuildOptions, Format, SchemaRegistry, SimContext, Topology,
};
pub use crate::domain::time::TimeQuantity;
pub use crate::utils::error::{PlatformError, Result};
