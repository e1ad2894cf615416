use mirkobot_config::Properties;
use mirkobot_core::{Bus, Handler, Result, SubscriptionId};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Weak};

use crate::kernel::{Kernel, KernelInner};
use crate::readiness::ReadinessSignal;

/// Non-owning reference back to the kernel.
#[derive(Clone)]
pub struct KernelHandle {
    inner: Weak<KernelInner>,
}

impl KernelHandle {
    pub(crate) fn new(inner: &Arc<KernelInner>) -> Self {
        Self {
            inner: Arc::downgrade(inner),
        }
    }

    /// `None` once the kernel has been dropped.
    pub fn upgrade(&self) -> Option<Kernel> {
        self.inner.upgrade().map(Kernel::from_inner)
    }
}

/// Everything a module receives at construction time.
#[derive(Clone)]
pub struct ModuleContext {
    name: String,
    bus: Bus,
    properties: Properties,
    readiness: ReadinessSignal,
    span: tracing::Span,
    kernel: KernelHandle,
}

impl ModuleContext {
    pub(crate) fn new(
        name: String,
        bus: Bus,
        properties: Properties,
        readiness: ReadinessSignal,
        span: tracing::Span,
        kernel: KernelHandle,
    ) -> Self {
        Self {
            name,
            bus,
            properties,
            readiness,
            span,
            kernel,
        }
    }

    /// Normalized module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Register a bus handler.
    pub fn on(&self, pattern: &str, handler: Handler) -> Result<SubscriptionId> {
        self.bus.on(pattern, handler)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties.get(key)
    }

    pub fn property_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.properties.get_or(key, default)
    }

    pub fn readiness(&self) -> &ReadinessSignal {
        &self.readiness
    }

    /// Span named after the module; enter it in spawned tasks.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn kernel(&self) -> Option<Kernel> {
        self.kernel.upgrade()
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
