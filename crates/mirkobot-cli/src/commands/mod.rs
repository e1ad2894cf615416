use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mirkobot_config::{ConfigLoader, MirkobotConfig, WarningSeverity};
use mirkobot_core::{MirkobotError, Result};

use crate::builtin;

mod start;

/// Modular chat bot for mirkoczat channels
#[derive(Parser)]
#[command(name = "mirkobot", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to mirkobot.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Load modules, join the configured channels and run until interrupted
    Start {
        /// Don't reload the config when the file changes
        #[arg(long)]
        no_watch: bool,
    },
    /// List built-in modules and whether the config enables them
    Modules,
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration
    Doctor,
    /// Show version and build info
    Version,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        init_tracing(&config, self.log_level_override());

        match self.command {
            Commands::Start { no_watch } => start::cmd_start(config_loader, !no_watch).await,
            Commands::Modules => Self::cmd_modules(&config),
            Commands::Config { json } => Self::cmd_config(&config, json),
            Commands::Doctor => Self::cmd_doctor(&config),
            Commands::Version => Self::cmd_version(),
        }
    }

    /// --verbose > --quiet > --log-level
    fn log_level_override(&self) -> Option<&str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            Some("error")
        } else {
            self.log_level.as_deref()
        }
    }

    fn cmd_modules(config: &MirkobotConfig) -> Result<()> {
        let registry = builtin::registry();
        println!("Built-in modules ({}):", registry.len());
        for (name, entry) in registry.iter() {
            let state = if config.modules.is_enabled(name) {
                "enabled"
            } else {
                "disabled"
            };
            println!("  {name:<16} {state:<9} {} ({})", entry.path, entry.definition.kind());
        }
        Ok(())
    }

    fn cmd_config(config: &MirkobotConfig, json: bool) -> Result<()> {
        let mut config = config.clone();
        if config.token.is_some() {
            config.token = Some("<redacted>".into());
        }
        let rendered = if json {
            serde_json::to_string_pretty(&config)?
        } else {
            toml::to_string_pretty(&config).map_err(|e| MirkobotError::Config(e.to_string()))?
        };
        println!("{rendered}");
        Ok(())
    }

    fn cmd_doctor(config: &MirkobotConfig) -> Result<()> {
        println!("Mirkobot doctor: configuration audit");
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("{e}");
                return Err(MirkobotError::Config("configuration is invalid".into()));
            }
        };

        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
                WarningSeverity::Error => {}
            }
        }

        let registry = builtin::registry();
        let unknown: Vec<&String> = match &config.modules {
            mirkobot_config::ModuleSelector::All => Vec::new(),
            mirkobot_config::ModuleSelector::Only(names) => {
                names.iter().filter(|n| !registry.contains(n)).collect()
            }
        };
        for name in &unknown {
            println!("  [warning] modules: '{name}' is not a built-in module");
            warn_count += 1;
        }

        println!();
        println!("  {warn_count} warnings, {info_count} suggestions");
        Ok(())
    }

    fn cmd_version() -> Result<()> {
        println!("Mirkobot v{}", env!("CARGO_PKG_VERSION"));
        println!("   Rust edition: 2024");
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }
}

/// Filter directive: `RUST_LOG` > flag override > `logging.level`.
fn log_directive(config: &MirkobotConfig, flag: Option<&str>) -> String {
    flag.unwrap_or(&config.logging.level).to_string()
}

fn init_tracing(config: &MirkobotConfig, flag: Option<&str>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_directive(config, flag)));

    let result = if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {e}");
    }
}
