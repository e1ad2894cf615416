//! Modules compiled into the binary.

use mirkobot_channels::{Mirkoczat, module as mirkoczat};
use mirkobot_kernel::ModuleRegistry;

/// Registry of every built-in module, keyed by its normalized name.
pub fn registry() -> ModuleRegistry {
    ModuleRegistry::new().with(mirkoczat::NAME, "mirkobot_channels::module", Mirkoczat::definition())
}
