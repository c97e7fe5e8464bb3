//! Configuration: JSON file, environment overrides, and defaults.
//!
//! - [`types`]: root `Config` struct
//! - [`server`]: connection and room lifecycle knobs
//! - [`database`]: storage backend selection
//! - [`security`]: token secret and CORS
//! - [`logging`]: log format and file output
//! - [`loader`]: loading and validation

pub mod database;
pub mod loader;
pub mod logging;
pub mod security;
pub mod server;
pub mod types;

pub use database::DatabaseConfig;

pub use loader::{load, validate};

pub use logging::{LogFormat, LogLevel, LoggingConfig};

pub use security::SecurityConfig;

pub use server::{RateLimitSection, ServerConfig};

pub use types::Config;
