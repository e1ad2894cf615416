use mirkobot_core::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::context::ModuleContext;
use crate::module::{Module, ModuleInstance};

type FactoryFn = dyn Fn(ModuleContext) -> Result<Arc<dyn Module>> + Send + Sync;
type CallableFn = dyn Fn(ModuleContext) -> Result<ModuleInstance> + Send + Sync;

/// How a registered module becomes an instance.
#[derive(Clone)]
pub enum ModuleDefinition {
    /// Used as-is; the context is not consulted.
    Value(ModuleInstance),
    /// Constructor taking the module context.
    Factory(Arc<FactoryFn>),
    /// Plain function taking the module context; whatever it returns is the
    /// instance, which may be an inert value.
    Callable(Arc<CallableFn>),
}

impl ModuleDefinition {
    pub fn value(value: Value) -> Self {
        ModuleDefinition::Value(ModuleInstance::Value(value))
    }

    pub fn instance(module: Arc<dyn Module>) -> Self {
        ModuleDefinition::Value(ModuleInstance::Module(module))
    }

    pub fn factory<M, F>(f: F) -> Self
    where
        M: Module,
        F: Fn(ModuleContext) -> Result<M> + Send + Sync + 'static,
    {
        ModuleDefinition::Factory(Arc::new(move |ctx| Ok(Arc::new(f(ctx)?) as Arc<dyn Module>)))
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(ModuleContext) -> Result<ModuleInstance> + Send + Sync + 'static,
    {
        ModuleDefinition::Callable(Arc::new(f))
    }

    /// Turn the definition into an instance.
    pub fn construct(&self, ctx: ModuleContext) -> Result<ModuleInstance> {
        match self {
            ModuleDefinition::Value(instance) => Ok(instance.clone()),
            ModuleDefinition::Factory(f) => f(ctx).map(ModuleInstance::Module),
            ModuleDefinition::Callable(f) => f(ctx),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ModuleDefinition::Value(_) => "value",
            ModuleDefinition::Factory(_) => "factory",
            ModuleDefinition::Callable(_) => "callable",
        }
    }
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleDefinition::{}", self.kind())
    }
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub definition: ModuleDefinition,
    pub path: String,
}

/// Compiled name → definition table.
///
/// Names are normalized to lowercase; a second registration under the same
/// normalized name is rejected.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(name: &str) -> String {
        name.trim().to_lowercase()
    }

    /// Returns false (and keeps the earlier entry) on a name collision.
    pub fn register(
        &mut self,
        name: &str,
        path: impl Into<String>,
        definition: ModuleDefinition,
    ) -> bool {
        let key = Self::normalize(name);
        if key.is_empty() {
            warn!("refusing to register module with empty name");
            return false;
        }
        if self.entries.contains_key(&key) {
            warn!(module = %key, "module name already registered, ignoring");
            return false;
        }
        self.entries.insert(
            key,
            RegistryEntry {
                definition,
                path: path.into(),
            },
        );
        true
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, name: &str, path: impl Into<String>, definition: ModuleDefinition) -> Self {
        self.register(name, path, definition);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(&Self::normalize(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegistryEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_are_normalized_and_unique() {
        let mut reg = ModuleRegistry::new();
        assert!(reg.register("Memo", "builtin::memo", ModuleDefinition::value(json!(1))));
        assert!(!reg.register("memo", "elsewhere", ModuleDefinition::value(json!(2))));
        assert!(reg.contains("MEMO"));
        assert_eq!(reg.get("memo").unwrap().path, "builtin::memo");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn names_are_sorted() {
        let reg = ModuleRegistry::new()
            .with("zeta", "z", ModuleDefinition::value(json!(null)))
            .with("alpha", "a", ModuleDefinition::value(json!(null)));
        assert_eq!(reg.names(), vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut reg = ModuleRegistry::new();
        assert!(!reg.register("  ", "x", ModuleDefinition::value(json!(0))));
        assert!(reg.is_empty());
    }
}
