use mirkobot_core::{MirkobotError, Result};
use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::properties::Properties;
use crate::schema::MirkobotConfig;

/// Loads and optionally hot-reloads the Mirkobot configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<MirkobotConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > MIRKOBOT_CONFIG env > ~/.mirkobot/mirkobot.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("MIRKOBOT_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mirkobot")
            .join("mirkobot.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            MirkobotConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Wrap an already-built config. Nothing is read from disk or env.
    pub fn from_config(config: MirkobotConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            config_path: PathBuf::new(),
        }
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> MirkobotConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<MirkobotConfig>> {
        Arc::clone(&self.config)
    }

    /// Key-path accessor reading through the shared snapshot.
    pub fn properties(&self) -> Properties {
        Properties::new(self.shared())
    }

    /// Path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn read_file(path: &Path) -> Result<MirkobotConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<MirkobotConfig>(&raw).map_err(|e| {
            MirkobotError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Validate, logging warnings and failing on errors.
    fn check(config: &MirkobotConfig) -> Result<()> {
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
                Ok(())
            }
            Err(e) => Err(MirkobotError::Config(e)),
        }
    }

    /// Apply env var overrides (MIRKOBOT_SERVER, MIRKOBOT_TOKEN, etc.)
    fn apply_env_overrides(mut config: MirkobotConfig) -> MirkobotConfig {
        if let Ok(v) = std::env::var("MIRKOBOT_SERVER") {
            config.server = v;
        }
        if let Ok(v) = std::env::var("MIRKOBOT_TOKEN") {
            if !v.trim().is_empty() {
                config.token = Some(v);
            }
        }
        if let Ok(v) = std::env::var("MIRKOBOT_CHANNELS") {
            config.channels = parse_channel_list(&v);
        }
        if let Ok(v) = std::env::var("MIRKOBOT_LOG_LEVEL") {
            config.logging.level = v;
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> Result<()> {
        if !self.config_path.exists() {
            return Err(MirkobotError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::read_file(&self.config_path)?);
        Self::check(&new_config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that swaps the snapshot when the config file changes.
    /// Returns a handle to the watcher (must be kept alive for watching to continue).
    pub fn watch(&self) -> Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let config_path = self.config_path.clone();

        info!(?config_path, "starting config file watcher");

        let path_for_event = config_path.clone();
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<NotifyEvent, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let is_our_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == path_for_event.file_name());
                    if !is_our_file {
                        return;
                    }

                    info!("config file changed, reloading");
                    match ConfigLoader::read_file(&path_for_event) {
                        Ok(new_config) => {
                            let new_config = ConfigLoader::apply_env_overrides(new_config);
                            if let Err(e) = ConfigLoader::check(&new_config) {
                                warn!(error = %e, "config file has errors, keeping current config");
                                return;
                            }
                            *config.write() = new_config;
                            info!("configuration hot-reloaded successfully");
                        }
                        Err(e) => {
                            warn!(error = %e, "config file has errors, keeping current config");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                }
            },
        )
        .map_err(|e| MirkobotError::Config(format!("failed to create file watcher: {}", e)))?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = match self.config_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                MirkobotError::Config(format!("failed to watch config directory: {}", e))
            })?;

        Ok(watcher)
    }
}

/// Split a comma separated channel list, dropping blanks.
pub fn parse_channel_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_list_trims_and_skips_blanks() {
        assert_eq!(
            parse_channel_list(" hydepark, ,muzyka,"),
            vec!["hydepark".to_string(), "muzyka".to_string()]
        );
        assert!(parse_channel_list("").is_empty());
    }
}
