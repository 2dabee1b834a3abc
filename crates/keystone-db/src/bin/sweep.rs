//! # Sweep
//!
//! Periodic housekeeping, meant for cron or a systemd timer:
//! expires lapsed quotes and marks unpaid invoices past due OVERDUE.
//!
//! ## Usage
//! ```bash
//! cargo run -p keystone-db --bin sweep
//! cargo run -p keystone-db --bin sweep -- --config /etc/keystone/keystone.toml
//! RUST_LOG=keystone_db=debug cargo run -p keystone-db --bin sweep
//! ```
//!
//! Running it twice in a row changes nothing the second time.

use std::env;
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use keystone_db::{BackOffice, KeystoneConfig};

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", default_filter)));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config" || a == "-c")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from);

    let config = KeystoneConfig::load(config_path)?;
    init_logging(&config.logging.filter);

    info!(database = %config.database.path.display(), "Starting sweep");
    let office = BackOffice::open(config).await?;

    let expired = match office.expire_quotes().await {
        Ok(quotes) => quotes,
        Err(e) => {
            error!(code = ?e.code(), error = %e, "Quote expiry failed");
            return Err(e.into());
        }
    };

    let overdue = match office.refresh_overdue().await {
        Ok(invoices) => invoices,
        Err(e) => {
            error!(code = ?e.code(), error = %e, "Overdue refresh failed");
            return Err(e.into());
        }
    };

    let health = office.database().health().await?;
    info!(
        expired_quotes = expired.len(),
        overdue_invoices = overdue.len(),
        pending_events = health.pending_events,
        "Sweep complete"
    );

    office.database().close().await;
    Ok(())
}
