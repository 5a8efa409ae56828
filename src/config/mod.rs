//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → sections registered as root container instances at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the container is wired from it once
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ApiConfig, ContainerConfig, CorsConfig, HttpConfig, ListenerConfig, ObservabilityConfig,
    ServerConfig, StaticFilesConfig, WebSocketConfig,
};
pub use validation::{validate_config, ValidationError};
