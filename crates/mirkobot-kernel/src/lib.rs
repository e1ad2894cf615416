//! # mirkobot-kernel
//!
//! Loads modules from a compiled registry, drives them through the
//! `prepare` → `init` → ready → `run` lifecycle and hands each one a
//! [`ModuleContext`] with the bus, configuration and its own log span.

pub mod context;
pub mod kernel;
pub mod module;
pub mod readiness;
pub mod registry;

pub use context::{KernelHandle, ModuleContext};
pub use kernel::{Kernel, PhaseResults, StartupError};
pub use module::{Module, ModuleDescriptor, ModuleInstance, Phase, PhaseResult, outcome};
pub use readiness::{ReadinessGate, ReadinessSignal};
pub use registry::{ModuleDefinition, ModuleRegistry};
