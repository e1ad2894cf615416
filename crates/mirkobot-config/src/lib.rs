//! # mirkobot-config
//!
//! Configuration system for the Mirkobot runtime. Reads from `mirkobot.toml`
//! and environment variables, in that precedence order, validates the result
//! and exposes it to modules through a `:`-separated [`Properties`] accessor.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod properties;
pub mod schema;

pub use loader::ConfigLoader;
pub use properties::Properties;
pub use schema::MirkobotConfig;
pub use schema::{
    ConfigWarning, KernelConfig, LoggingConfig, ModuleSelector, SupervisorConfig,
    WarningSeverity,
};
