use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use mineguard_supervisor::{
    Daemon, config::DaemonConfig, logging::init_logging, os_signals::wait_for_shutdown_signal,
    store::FileStore,
};

const CONFIG_ENV: &str = "MINEGUARD_CONFIG";
const DEFAULT_CONFIG: &str = "/etc/mineguard/supervisor.toml";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let config = match DaemonConfig::load_or_default(&path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mineguard: {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging, &config.data_dir) {
        eprintln!("mineguard: logging setup failed: {e}");
        return ExitCode::FAILURE;
    }

    let store = match FileStore::open(&config.data_dir).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "cannot open state store");
            return ExitCode::FAILURE;
        }
    };

    let handle = match Daemon::start(config, store).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "daemon failed to start");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = wait_for_shutdown_signal().await {
        tracing::error!(error = %e, "cannot install signal handlers, shutting down");
    }

    if handle.shutdown(SHUTDOWN_GRACE).await {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
