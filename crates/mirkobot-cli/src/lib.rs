//! # mirkobot-cli
//!
//! Command-line interface for the Mirkobot runtime.
//!
//! ## Commands
//!
//! - `mirkobot start`: load modules, connect to mirkoczat and run until interrupted
//! - `mirkobot modules`: list built-in modules and which are enabled
//! - `mirkobot config`: print the effective configuration
//! - `mirkobot doctor`: validate the configuration
//! - `mirkobot version`: version and build info

pub mod builtin;
pub mod commands;

pub use commands::Cli;
