//! `:`-separated key-path access to the live configuration.

use mirkobot_core::{MirkobotError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::schema::MirkobotConfig;

/// Separator between key-path segments, e.g. `logger:path`.
pub const KEY_SEPARATOR: char = ':';

/// Read-only view over the shared config snapshot.
///
/// Reads always go through the shared lock, so a hot reload is visible to
/// every holder without re-fetching.
#[derive(Clone)]
pub struct Properties {
    config: Arc<RwLock<MirkobotConfig>>,
}

impl Properties {
    pub fn new(config: Arc<RwLock<MirkobotConfig>>) -> Self {
        Self { config }
    }

    pub fn from_config(config: MirkobotConfig) -> Self {
        Self::new(Arc::new(RwLock::new(config)))
    }

    pub fn snapshot(&self) -> MirkobotConfig {
        self.config.read().clone()
    }

    /// Look up a key path. Top-level keys and free-form module tables share
    /// one namespace: `server`, `supervisor:sweep_interval_secs`, `logger:path`.
    pub fn get(&self, key: &str) -> Option<Value> {
        let root = serde_json::to_value(&*self.config.read()).ok()?;
        let mut cur = &root;
        for part in key.split(KEY_SEPARATOR) {
            cur = match cur {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        match cur {
            Value::Null => None,
            v => Some(v.clone()),
        }
    }

    /// Typed lookup; a value of the wrong shape counts as missing.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_as(key).unwrap_or(default)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    /// Fail when any key is absent, null or an empty string.
    pub fn require(&self, keys: &[&str]) -> Result<()> {
        let missing: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|k| match self.get(k) {
                None => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(MirkobotError::ConfigValidation {
            field: missing.join(", "),
            reason: "required property is not set".into(),
        })
    }
}

impl std::fmt::Debug for Properties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Properties").finish_non_exhaustive()
    }
}
