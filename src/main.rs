//! Database reflection server - main entry point.
//!
//! Serves the rows of any table on a reachable SQLite, PostgreSQL or MySQL
//! database as JSON, discovering the table's shape at request time.

use clap::Parser;
use db_reflect_server::config::Config;
use db_reflect_server::service::ReflectService;
use db_reflect_server::transport::{HttpTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    init_tracing(&config);

    if let Err(message) = config.validate() {
        eprintln!("Error: {}", message);
        std::process::exit(1);
    }

    info!(
        host = %config.http_host,
        port = config.http_port,
        sqlite_dir = %config.sqlite_dir.display(),
        "Starting DB Reflect Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let service = Arc::new(ReflectService::from_config(&config));
    let transport = HttpTransport::new(
        service,
        &config.http_host,
        config.http_port,
        &config.default_server,
    );

    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
