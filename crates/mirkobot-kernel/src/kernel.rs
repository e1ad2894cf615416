use mirkobot_config::{ModuleSelector, Properties};
use mirkobot_core::{Bus, Handler, Result, SubscriptionId, panic_message, topics};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::context::{KernelHandle, ModuleContext};
use crate::module::{ModuleDescriptor, ModuleInstance, Phase, PhaseResult, outcome};
use crate::readiness::ReadinessGate;
use crate::registry::ModuleRegistry;

/// Per-module return values of one phase, keyed by module name.
pub type PhaseResults = BTreeMap<String, PhaseResult>;

/// Why [`Kernel::run`] did not reach the run phase.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartupError {
    #[error("Application does not prepared!")]
    NotPrepared,
    #[error("Application does not initialized!")]
    NotInitialized,
    #[error("modules did not become ready within {0:?}")]
    ReadinessTimeout(Duration),
    #[error("startup cancelled while waiting for modules")]
    Cancelled,
}

pub(crate) struct KernelInner {
    registry: ModuleRegistry,
    bus: Bus,
    properties: Properties,
    modules: RwLock<HashMap<String, Arc<ModuleDescriptor>>>,
    gate: ReadinessGate,
    run_lock: tokio::sync::Mutex<()>,
    ran: AtomicBool,
    stopped: AtomicBool,
}

/// Module lifecycle orchestrator.
///
/// Cheap to clone; all clones share the same module set and bus.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    pub fn new(registry: ModuleRegistry, properties: Properties) -> Self {
        Self::with_bus(registry, properties, Bus::new())
    }

    pub fn with_bus(registry: ModuleRegistry, properties: Properties, bus: Bus) -> Self {
        Self {
            inner: Arc::new(KernelInner {
                registry,
                bus,
                properties,
                modules: RwLock::new(HashMap::new()),
                gate: ReadinessGate::new(),
                run_lock: tokio::sync::Mutex::new(()),
                ran: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<KernelInner>) -> Self {
        Self { inner }
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    /// Register a bus handler.
    pub fn on(&self, pattern: &str, handler: Handler) -> Result<SubscriptionId> {
        self.inner.bus.on(pattern, handler)
    }

    pub fn properties(&self) -> &Properties {
        &self.inner.properties
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.inner.properties.get(key)
    }

    pub fn property_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.inner.properties.get_or(key, default)
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.inner.registry
    }

    pub fn is_loaded_module(&self, name: &str) -> bool {
        self.descriptor(name).is_some()
    }

    pub fn descriptor(&self, name: &str) -> Option<Arc<ModuleDescriptor>> {
        self.inner
            .modules
            .read()
            .get(&ModuleRegistry::normalize(name))
            .cloned()
    }

    /// Loaded module names, sorted.
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.modules.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Borrow a loaded module as its concrete type.
    pub fn with_module<T, R>(&self, name: &str, f: impl FnOnce(&T) -> R) -> Option<R>
    where
        T: 'static,
    {
        let descriptor = self.descriptor(name)?;
        match &descriptor.instance {
            ModuleInstance::Module(m) => m.as_any().downcast_ref::<T>().map(f),
            ModuleInstance::Value(_) => None,
        }
    }

    pub fn has_run(&self) -> bool {
        self.inner.ran.load(Ordering::SeqCst)
    }

    // ── Loading ────────────────────────────────────────────────

    /// Load a module by name. Returns the existing descriptor when already
    /// loaded; logs and returns `None` when the name is unknown or
    /// construction fails.
    pub fn load_module(&self, name: &str) -> Option<Arc<ModuleDescriptor>> {
        let key = ModuleRegistry::normalize(name);
        if let Some(existing) = self.inner.modules.read().get(&key) {
            return Some(Arc::clone(existing));
        }

        let Some(entry) = self.inner.registry.get(&key) else {
            warn!(module = %key, "Failed load module: {key}");
            return None;
        };

        let span = tracing::info_span!("module", name = %key);
        let ctx = ModuleContext::new(
            key.clone(),
            self.inner.bus.clone(),
            self.inner.properties.clone(),
            self.inner.gate.signal(),
            span.clone(),
            KernelHandle::new(&self.inner),
        );

        let built = {
            let _enter = span.enter();
            catch_unwind(AssertUnwindSafe(|| entry.definition.construct(ctx)))
        };
        let instance = match built {
            Ok(Ok(instance)) => instance,
            Ok(Err(e)) => {
                error!(module = %key, error = %e, "Failed load module: {key}");
                return None;
            }
            Err(panic) => {
                error!(
                    module = %key,
                    error = %panic_message(panic.as_ref()),
                    "Failed load module: {key}"
                );
                return None;
            }
        };

        let descriptor = Arc::new(ModuleDescriptor {
            name: key.clone(),
            instance,
            path: entry.path.clone(),
            span,
        });

        {
            let mut modules = self.inner.modules.write();
            // A constructor may have loaded the same name re-entrantly.
            if let Some(existing) = modules.get(&key) {
                return Some(Arc::clone(existing));
            }
            modules.insert(key.clone(), Arc::clone(&descriptor));
        }

        info!(
            module = %key,
            path = %descriptor.path,
            kind = descriptor.instance.kind(),
            "module loaded"
        );
        self.inner
            .bus
            .emit(topics::MODULE_REGISTER, vec![descriptor.to_value()]);
        Some(descriptor)
    }

    /// Load every registered module the selector enables. Returns the names
    /// that ended up loaded.
    pub fn load_modules(&self, selector: &ModuleSelector) -> Vec<String> {
        let mut loaded = Vec::new();
        let mut disabled = Vec::new();

        for name in self.inner.registry.names() {
            if !selector.is_enabled(&name) {
                disabled.push(name);
                continue;
            }
            if self.load_module(&name).is_some() {
                loaded.push(name);
            }
        }

        // Enabled names with no registry entry still get their failure logged.
        if let ModuleSelector::Only(list) = selector {
            for name in list {
                if !self.inner.registry.contains(name) {
                    self.load_module(name);
                }
            }
        }

        if !disabled.is_empty() {
            info!(modules = ?disabled, "discovered modules not enabled");
        }
        loaded
    }

    /// [`load_modules`](Self::load_modules) with the `modules` selector from config.
    pub fn load_configured(&self) -> Vec<String> {
        let selector = self.inner.properties.snapshot().modules;
        self.load_modules(&selector)
    }

    // ── Phases ─────────────────────────────────────────────────

    /// Invoke `phase` on every loaded module, dependencies first (reverse for
    /// `stop`). A module that panics reports `false`.
    pub fn execute(&self, phase: Phase, args: &[Value]) -> PhaseResults {
        let mut order = self.dependency_order();
        if phase == Phase::Stop {
            order.reverse();
        }

        let mut results = PhaseResults::new();
        for descriptor in order {
            let result = {
                let _enter = descriptor.span.enter();
                match catch_unwind(AssertUnwindSafe(|| descriptor.instance.invoke(phase, args))) {
                    Ok(result) => result,
                    Err(panic) => {
                        error!(
                            module = %descriptor.name,
                            phase = %phase,
                            error = %panic_message(panic.as_ref()),
                            "module panicked"
                        );
                        outcome(false)
                    }
                }
            };
            results.insert(descriptor.name.clone(), result);
        }
        results
    }

    pub fn is_prepared(&self) -> bool {
        passes(&self.execute(Phase::IsPrepared, &[]))
    }

    pub fn is_initialized(&self) -> bool {
        passes(&self.execute(Phase::IsInitialized, &[]))
    }

    /// Always true once [`run`](Self::run) has completed.
    pub fn is_ready(&self) -> bool {
        self.has_run() || self.modules_ready()
    }

    fn modules_ready(&self) -> bool {
        passes(&self.execute(Phase::IsReady, &[]))
    }

    /// prepare → init → wait for readiness → run. A second call after
    /// success is a no-op returning `Ok`.
    pub async fn run(&self) -> std::result::Result<(), StartupError> {
        let _guard = self.inner.run_lock.lock().await;
        if self.has_run() {
            return Ok(());
        }

        self.execute(Phase::Prepare, &[]);
        if !self.is_prepared() {
            error!(phase = %Phase::Prepare, "{}", StartupError::NotPrepared);
            return Err(StartupError::NotPrepared);
        }

        self.execute(Phase::Init, &[]);
        if !self.is_initialized() {
            error!(phase = %Phase::Init, "{}", StartupError::NotInitialized);
            return Err(StartupError::NotInitialized);
        }

        if !self.modules_ready() {
            let poll = Duration::from_millis(self.property_or("kernel:ready_poll_ms", 1000u64).max(1));
            let timeout = match self.property_or("kernel:ready_timeout_secs", 0u64) {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            };
            info!(poll_ms = poll.as_millis() as u64, "waiting for modules to become ready");
            if let Err(e) = self
                .inner
                .gate
                .wait_until(|| self.modules_ready(), poll, timeout)
                .await
            {
                error!(phase = %Phase::IsReady, error = %e, "startup aborted");
                return Err(e);
            }
        }

        self.execute(Phase::Run, &[]);
        self.inner.ran.store(true, Ordering::SeqCst);
        info!("Application successfully started!");
        Ok(())
    }

    /// Abort a pending readiness wait without stopping modules. A later
    /// [`run`](Self::run) starts a fresh wait.
    pub fn cancel(&self) {
        self.inner.gate.cancel();
    }

    /// Run `stop` on every module in reverse dependency order. Idempotent.
    pub fn stop(&self) -> PhaseResults {
        self.inner.gate.shutdown();
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return PhaseResults::new();
        }
        let results = self.execute(Phase::Stop, &[]);
        info!("application stopped");
        results
    }

    /// Loaded modules with dependencies ahead of dependents; ties by name.
    fn dependency_order(&self) -> Vec<Arc<ModuleDescriptor>> {
        let modules: BTreeMap<String, Arc<ModuleDescriptor>> = self
            .inner
            .modules
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            name: &str,
            modules: &BTreeMap<String, Arc<ModuleDescriptor>>,
            marks: &mut HashMap<String, Mark>,
            order: &mut Vec<Arc<ModuleDescriptor>>,
        ) {
            match marks.get(name) {
                Some(Mark::Done) => return,
                Some(Mark::Visiting) => {
                    warn!(module = %name, "dependency cycle detected, ignoring back edge");
                    return;
                }
                None => {}
            }
            let Some(descriptor) = modules.get(name) else {
                return;
            };
            marks.insert(name.to_string(), Mark::Visiting);

            let mut deps: Vec<String> = descriptor
                .instance
                .dependencies()
                .iter()
                .map(|d| ModuleRegistry::normalize(d))
                .collect();
            deps.sort();
            for dep in deps {
                if !modules.contains_key(&dep) {
                    debug!(module = %name, dependency = %dep, "dependency not loaded, ignoring");
                    continue;
                }
                visit(&dep, modules, marks, order);
            }

            marks.insert(name.to_string(), Mark::Done);
            order.push(Arc::clone(descriptor));
        }

        let mut marks = HashMap::new();
        let mut order = Vec::with_capacity(modules.len());
        for name in modules.keys() {
            visit(name, &modules, &mut marks, &mut order);
        }
        order
    }
}

/// Permissive aggregate: only an explicit `false` fails.
fn passes(results: &PhaseResults) -> bool {
    !results
        .values()
        .any(|r| matches!(r, Some(Value::Bool(false))))
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("modules", &self.module_names())
            .field("ran", &self.has_run())
            .finish()
    }
}
