use std::sync::Arc;

use log::{error, info};
use thiserror::Error;

use vote_ledger::{
    ledger::{Ledger, PhaseScheduler, SystemClock},
    logging,
    store::MongoStore,
    Config,
};

/// How often the database is rescanned for elections deployed since the last scan.
const RESCAN_INTERVAL: tokio::time::Duration = tokio::time::Duration::from_secs(60);

/// Errors that are critical to the entire daemon.
#[derive(Debug, Error)]
enum Error {
    #[error("Failed to start: {0}")]
    Ledger(#[from] vote_ledger::Error),
    #[error("Failed to listen for shutdown: {0}")]
    Signal(#[from] std::io::Error),
}

async fn run() -> Result<(), Error> {
    info!("Configuring ledger...");
    let config = Config::load()?;
    let store = MongoStore::connect(&config).await?;
    let ledger = Arc::new(
        Ledger::new(store, SystemClock).with_conflict_retries(config.conflict_retries()),
    );
    let scheduler = PhaseScheduler::new(ledger, config.retry_interval());
    let scheduled = scheduler.schedule_elections().await?;
    info!("...ledger online, {scheduled} elections scheduled");

    let mut rescan = tokio::time::interval(RESCAN_INTERVAL);
    rescan.tick().await;
    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break signal.map_err(Error::from);
            }
            _ = rescan.tick() => {
                if let Err(err) = scheduler.schedule_elections().await {
                    error!("Failed to rescan elections: {err}");
                }
            }
        }
    };
    scheduler.shutdown().await;
    result
}

#[tokio::main]
async fn main() {
    // Set up logging.
    if let Err(err) = logging::init() {
        eprintln!("{err}");
        std::process::exit(1)
    }

    if let Err(err) = run().await {
        error!("{err}");
        error!("Critical failure, shutting down");
        std::process::exit(1)
    }
}
