use mirkobot_core::topics;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Endpoint used when `server` is not configured.
pub const DEFAULT_SERVER: &str = "ws://mirkoczat.pl/socket/websocket";

/// Channel joined when `channels` is not configured.
pub const DEFAULT_CHANNEL: &str = "hydepark";

/// Root configuration, maps to `mirkobot.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirkobotConfig {
    /// Websocket endpoint of the chat server.
    pub server: String,
    /// Base64 credential blob issued by the chat server.
    pub token: Option<String>,
    /// Channels joined at startup.
    pub channels: Vec<String>,
    /// Which registered modules to load.
    pub modules: ModuleSelector,
    pub kernel: KernelConfig,
    pub supervisor: SupervisorConfig,
    pub logging: LoggingConfig,
    /// Free-form per-module settings, e.g. `[logger] path = "..."`.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── Modules ────────────────────────────────────────────────────

/// Enabled-module selector: the keyword `"all"` or an explicit list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSelector", into = "RawSelector")]
pub enum ModuleSelector {
    #[default]
    All,
    Only(Vec<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawSelector {
    Keyword(String),
    List(Vec<String>),
}

impl TryFrom<RawSelector> for ModuleSelector {
    type Error = String;

    fn try_from(raw: RawSelector) -> Result<Self, Self::Error> {
        match raw {
            RawSelector::Keyword(k) if k.eq_ignore_ascii_case("all") => Ok(ModuleSelector::All),
            RawSelector::Keyword(k) => Ok(ModuleSelector::Only(vec![k])),
            RawSelector::List(list) => Ok(ModuleSelector::Only(list)),
        }
    }
}

impl From<ModuleSelector> for RawSelector {
    fn from(sel: ModuleSelector) -> Self {
        match sel {
            ModuleSelector::All => RawSelector::Keyword("all".into()),
            ModuleSelector::Only(list) => RawSelector::List(list),
        }
    }
}

impl ModuleSelector {
    /// Case-insensitive membership test; surrounding whitespace is ignored
    /// on both sides, like registry names.
    pub fn is_enabled(&self, name: &str) -> bool {
        let name = name.trim();
        match self {
            ModuleSelector::All => true,
            ModuleSelector::Only(list) => list.iter().any(|n| n.trim().eq_ignore_ascii_case(name)),
        }
    }
}

// ── Kernel ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Interval between readiness re-checks while waiting to run.
    pub ready_poll_ms: u64,
    /// Give up waiting for readiness after this many seconds. 0 = wait forever.
    pub ready_timeout_secs: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            ready_poll_ms: 1000,
            ready_timeout_secs: 0,
        }
    }
}

// ── Supervisor ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Health sweep period.
    pub sweep_interval_secs: u64,
    /// Upper bound on a single connect handshake.
    pub connect_timeout_secs: u64,
    /// Delay before the second rejoin attempt of a failing channel.
    pub backoff_first_secs: u64,
    /// Cap for the rejoin delay.
    pub backoff_max_secs: u64,
    /// Capacity of each outbound message queue.
    pub outbound_queue: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 6,
            connect_timeout_secs: 5,
            backoff_first_secs: 1,
            backoff_max_secs: 60,
            outbound_queue: 256,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Default for root ───────────────────────────────────────────

impl Default for MirkobotConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.into(),
            token: None,
            channels: vec![DEFAULT_CHANNEL.into()],
            modules: ModuleSelector::All,
            kernel: KernelConfig::default(),
            supervisor: SupervisorConfig::default(),
            logging: LoggingConfig::default(),
            extra: serde_json::Map::new(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", tag, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl MirkobotConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Server ───
        if self.server.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "server".into(),
                message: "server endpoint is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some(format!("Set to e.g. '{DEFAULT_SERVER}'")),
            });
        } else {
            match url::Url::parse(&self.server) {
                Ok(u) if u.scheme() == "ws" || u.scheme() == "wss" => {}
                Ok(u) => warnings.push(ConfigWarning {
                    field: "server".into(),
                    message: format!("unexpected scheme '{}'", u.scheme()),
                    severity: WarningSeverity::Warning,
                    hint: Some("The chat server speaks websocket: use ws:// or wss://".into()),
                }),
                Err(e) => warnings.push(ConfigWarning {
                    field: "server".into(),
                    message: format!("'{}' is not a valid URL: {}", self.server, e),
                    severity: WarningSeverity::Error,
                    hint: None,
                }),
            }
        }

        // ── Token ───
        if self.token.as_deref().is_none_or(|t| t.trim().is_empty()) {
            warnings.push(ConfigWarning {
                field: "token".into(),
                message: "no token configured, channel modules will refuse to start".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set `token` in mirkobot.toml or MIRKOBOT_TOKEN".into()),
            });
        }

        // ── Channels ───
        if self.channels.is_empty() {
            warnings.push(ConfigWarning {
                field: "channels".into(),
                message: "no channels configured, nothing will be joined at startup".into(),
                severity: WarningSeverity::Info,
                hint: Some(format!("Add e.g. channels = [\"{DEFAULT_CHANNEL}\"]")),
            });
        }
        let mut seen = HashSet::new();
        for name in &self.channels {
            if !topics::is_valid_channel_name(name) {
                warnings.push(ConfigWarning {
                    field: "channels".into(),
                    message: format!("invalid channel name '{name}'"),
                    severity: WarningSeverity::Error,
                    hint: Some(
                        "Channel names must be non-empty, without whitespace or '::', and not '*'"
                            .into(),
                    ),
                });
            } else if !seen.insert(name.as_str()) {
                warnings.push(ConfigWarning {
                    field: "channels".into(),
                    message: format!("channel '{name}' listed more than once"),
                    severity: WarningSeverity::Warning,
                    hint: None,
                });
            }
        }

        // ── Kernel ───
        if self.kernel.ready_poll_ms == 0 {
            warnings.push(ConfigWarning {
                field: "kernel.ready_poll_ms".into(),
                message: "poll interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 1000".into()),
            });
        }

        // ── Supervisor ───
        if self.supervisor.sweep_interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "supervisor.sweep_interval_secs".into(),
                message: "sweep interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 6".into()),
            });
        }
        if self.supervisor.connect_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "supervisor.connect_timeout_secs".into(),
                message: "connect timeout is 0, every handshake would fail".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 5".into()),
            });
        } else if self.supervisor.connect_timeout_secs >= self.supervisor.sweep_interval_secs {
            warnings.push(ConfigWarning {
                field: "supervisor.connect_timeout_secs".into(),
                message: "connect timeout is not shorter than the sweep interval".into(),
                severity: WarningSeverity::Info,
                hint: Some("A slow handshake will delay the next rejoin by a full sweep".into()),
            });
        }
        if self.supervisor.backoff_max_secs < self.supervisor.backoff_first_secs {
            warnings.push(ConfigWarning {
                field: "supervisor.backoff_max_secs".into(),
                message: "backoff cap is lower than the first delay".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }
        if self.supervisor.outbound_queue == 0 {
            warnings.push(ConfigWarning {
                field: "supervisor.outbound_queue".into(),
                message: "outbound queue capacity is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 256".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
