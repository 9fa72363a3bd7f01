//! Thesis server - topic reservation and assignment service
//!
//! Opens the topic database, checks stored data against the workflow
//! invariants and serves topic calls over TCP until interrupted.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thesis_core::Database;
use thesis_net::Server;

mod config;
mod error;
mod service;

use config::ServerConfig;
use error::Result;
use service::EngineService;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting thesis server");

    if let Err(e) = run().await {
        error!("Server failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = ServerConfig::load()?;

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Migrate once up front; calls then connect to an up-to-date schema
    {
        let db = Database::open(&config.database_path)?;
        info!(
            path = %config.database_path.display(),
            schema_version = db.schema_version(),
            "Database ready"
        );

        let expired = db.users().cleanup_expired_sessions()?;
        if expired > 0 {
            info!(expired, "Removed expired sessions");
        }

        let violations = thesis_core::audit(&db)?;
        for violation in &violations {
            warn!(%violation, "Stored data violates a workflow invariant");
        }
        if violations.is_empty() {
            info!("Invariant audit passed");
        }
    }

    let service = Arc::new(EngineService::new(
        config.database_path.clone(),
        config.busy_timeout(),
    ));
    let server = Server::start(config.listen_port, service, config.max_connections).await?;
    info!(addr = %server.addr(), "Listening");

    tokio::signal::ctrl_c().await?;
    server.shutdown();
    info!("Shutting down");

    Ok(())
}
