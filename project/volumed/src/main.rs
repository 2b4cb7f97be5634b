use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use volumed::api;
use volumed::config::{Config, DriverChoice};
use volumed::storage;
use volumed::storage::paths::PathManager;
use volumed::utils::state::AppState;
use volumed::volume::reaper::Reaper;
use volumed::volume::repository::Repository;

#[derive(Parser, Debug)]
#[command(name = "volumed", about = "Node-local volume management daemon")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "VOLUMED_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "VOLUMED_PORT", default_value_t = 7788)]
    port: u16,

    /// Directory volumes are managed under
    #[arg(long, env = "VOLUMED_STORAGE_ROOT", value_name = "DIR")]
    storage_root: PathBuf,

    /// Seconds between expired-volume sweeps
    #[arg(long, env = "VOLUMED_REAP_INTERVAL_SECS", default_value_t = 30)]
    reap_interval_secs: u64,

    /// Filesystem backend to use
    #[arg(long, value_enum, default_value = "auto")]
    driver: DriverChoice,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            host: self.host,
            port: self.port,
            storage_root: self.storage_root,
            reaper_interval: Duration::from_secs(self.reap_interval_secs),
            driver: self.driver,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Args::parse().into_config();

    let driver = storage::select_driver(config.driver, &config.storage_root)
        .context("storage root is not usable")?;
    let paths = PathManager::new(&config.storage_root);
    let repository = Arc::new(
        Repository::recover(driver, paths)
            .await
            .context("failed to recover volume repository")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = Reaper::new(repository.clone(), config.reaper_interval);
    let reaper_task = tokio::spawn(reaper.run(shutdown_rx));

    let state = Arc::new(AppState::new(repository));
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    let _ = reaper_task.await;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutting down...");
}
