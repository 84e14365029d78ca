use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use tracing_subscriber::EnvFilter;

use llamalith::config::load_config;
use llamalith::db::{self, Database};
use llamalith::engine::EnginePool;
use llamalith::error::{ConfigError, WorkerError};
use llamalith::worker::WorkerPool;

fn main() {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!("Starting llamalith v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run() {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

/// Routes `log` records into tracing, then installs the fmt subscriber.
/// The library logs with `log` macros; the pipeline span comes from
/// `tracing` directly.
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    tracing_log::LogTracer::init()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn run() -> llamalith::Result<()> {
    let config_path = std::env::var("LLAMALITH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));
    let config = Arc::new(load_config(&config_path)?);

    let db_path = match &config.database_path {
        Some(path) => PathBuf::from(path),
        None => db::default_database_path().ok_or_else(|| ConfigError::Validation {
            message: "cannot determine home directory for the default database path".to_string(),
        })?,
    };
    let db = Database::open(&db_path)?;

    let engines = Arc::new(EnginePool::new());

    // wake_tx stays alive for the process lifetime; dropping it would
    // disconnect the workers' idle wait.
    let (wake_tx, wake_rx) = crossbeam_channel::unbounded();
    let pool = WorkerPool::start(db, Arc::clone(&config), engines, wake_rx)?;

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .map_err(|e| WorkerError::Signal(e.to_string()))?;

    info!("Ready; waiting for jobs (Ctrl-C to stop)");
    let _ = stop_rx.recv();

    info!("Signal received, stopping");
    pool.shutdown();
    drop(wake_tx);
    pool.wait();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_installs_the_log_bridge() {
        // First call wins; log records must reach tracing afterwards.
        init_logging().unwrap();
        assert!(init_logging().is_err());
        log::info!("bridged record");
    }
}
