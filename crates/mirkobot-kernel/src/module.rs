use serde_json::{Value, json};
use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use mirkobot_core::MirkobotError;

/// What a module returned for a phase. `None` means the module does not
/// take part in that phase.
pub type PhaseResult = Option<Value>;

/// Shorthand for a phase that reports a boolean outcome.
pub fn outcome(ok: bool) -> PhaseResult {
    Some(Value::Bool(ok))
}

/// Lifecycle phases the kernel can execute across all modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Prepare,
    IsPrepared,
    Init,
    IsInitialized,
    IsReady,
    Run,
    Stop,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::IsPrepared => "isPrepared",
            Phase::Init => "init",
            Phase::IsInitialized => "isInitialized",
            Phase::IsReady => "isReady",
            Phase::Run => "run",
            Phase::Stop => "stop",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = MirkobotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "prepare" => Phase::Prepare,
            "isPrepared" => Phase::IsPrepared,
            "init" => Phase::Init,
            "isInitialized" => Phase::IsInitialized,
            "isReady" => Phase::IsReady,
            "run" => Phase::Run,
            "stop" => Phase::Stop,
            other => {
                return Err(MirkobotError::module("kernel", format!("unknown phase '{other}'")));
            }
        })
    }
}

/// The optional-phase module contract.
///
/// Every phase has a default that opts out (`None`), so a module only
/// implements what it needs. State lives behind interior mutability since
/// the kernel shares instances through `Arc`.
pub trait Module: Send + Sync + 'static {
    /// Names of modules that must be visited before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn prepare(&self, _args: &[Value]) -> PhaseResult {
        None
    }

    fn is_prepared(&self) -> PhaseResult {
        None
    }

    fn init(&self, _args: &[Value]) -> PhaseResult {
        None
    }

    fn is_initialized(&self) -> PhaseResult {
        None
    }

    fn is_ready(&self) -> PhaseResult {
        None
    }

    fn run(&self, _args: &[Value]) -> PhaseResult {
        None
    }

    fn stop(&self, _args: &[Value]) -> PhaseResult {
        None
    }

    /// Typed access for [`crate::Kernel::with_module`].
    fn as_any(&self) -> &dyn Any;
}

/// A loaded module: either a lifecycle-capable object or a plain value.
#[derive(Clone)]
pub enum ModuleInstance {
    Module(Arc<dyn Module>),
    /// Inert value; takes part in no phase.
    Value(Value),
}

impl ModuleInstance {
    pub fn invoke(&self, phase: Phase, args: &[Value]) -> PhaseResult {
        let module = match self {
            ModuleInstance::Module(m) => m,
            ModuleInstance::Value(_) => return None,
        };
        match phase {
            Phase::Prepare => module.prepare(args),
            Phase::IsPrepared => module.is_prepared(),
            Phase::Init => module.init(args),
            Phase::IsInitialized => module.is_initialized(),
            Phase::IsReady => module.is_ready(),
            Phase::Run => module.run(args),
            Phase::Stop => module.stop(args),
        }
    }

    pub fn dependencies(&self) -> Vec<String> {
        match self {
            ModuleInstance::Module(m) => m.dependencies(),
            ModuleInstance::Value(_) => Vec::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ModuleInstance::Module(_) => "module",
            ModuleInstance::Value(_) => "value",
        }
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleInstance::Module(_) => f.write_str("Module(..)"),
            ModuleInstance::Value(v) => f.debug_tuple("Value").field(v).finish(),
        }
    }
}

/// Identity of a loaded module. Created once per name for the process lifetime.
#[derive(Debug)]
pub struct ModuleDescriptor {
    pub name: String,
    pub instance: ModuleInstance,
    /// Where the definition came from, e.g. `builtin::mirkoczat`.
    pub path: String,
    pub(crate) span: tracing::Span,
}

impl ModuleDescriptor {
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Payload of the `core::modules::register` event.
    pub fn to_value(&self) -> Value {
        let mut payload = json!({
            "name": self.name,
            "path": self.path,
            "kind": self.instance.kind(),
        });
        if let ModuleInstance::Value(v) = &self.instance {
            payload["value"] = v.clone();
        }
        payload
    }
}
