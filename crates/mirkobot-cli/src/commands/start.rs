use tracing::{info, warn};

use mirkobot_config::ConfigLoader;
use mirkobot_core::{MirkobotError, Result};
use mirkobot_kernel::Kernel;

use crate::builtin;

pub(super) async fn cmd_start(config_loader: ConfigLoader, watch: bool) -> Result<()> {
    let config = config_loader.get();
    println!("Mirkobot v{}", env!("CARGO_PKG_VERSION"));
    println!("   Server: {}", config.server);
    println!("   Channels: {}", config.channels.join(", "));
    println!();

    // Kept alive for the lifetime of the runtime
    let _watcher = if watch {
        match config_loader.watch() {
            Ok(w) => {
                println!("   Config hot-reload: enabled");
                Some(w)
            }
            Err(e) => {
                warn!(error = %e, "config hot-reload disabled");
                None
            }
        }
    } else {
        None
    };

    let kernel = Kernel::new(builtin::registry(), config_loader.properties());
    let loaded = kernel.load_configured();
    if loaded.is_empty() {
        warn!("no modules enabled, nothing to run");
    }

    tokio::select! {
        result = kernel.run() => {
            if let Err(e) = result {
                kernel.stop();
                return Err(MirkobotError::Other(e.into()));
            }
        }
        signal = wait_for_shutdown_signal() => {
            signal?;
            info!("shutdown requested during startup");
            kernel.stop();
            return Ok(());
        }
    }

    wait_for_shutdown_signal().await?;
    info!("shutting down");
    kernel.stop();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
