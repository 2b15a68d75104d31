/// Daemon side of uptimed
///
/// Wires the persistence layer, registry, stats store and scheduler together
/// and serves them to clients over ZeroMQ.
pub mod protocol;
pub mod server;
pub mod service;

pub use protocol::{Payload, Reply, Request, ServiceStatus};
pub use service::ServiceFacade;

use anyhow::Context;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::DatabaseImpl;
use crate::error::ServiceError;
use crate::monitoring::{CheckScheduler, HttpProber};
use crate::registry::MonitorRegistry;
use crate::stats::StatsStore;

/// Connections beyond the request workers, shared by probe writers
const EXTRA_CONNECTIONS: usize = 4;

/// Run the daemon until ctrl-c.
///
/// Failing to open the database or bind the endpoint aborts startup; nothing
/// after that is fatal.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let pool = crate::pool::open_pool(&db_path, config.zeromq.workers + EXTRA_CONNECTIONS)
        .await
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    {
        let conn = pool
            .get()
            .await
            .map_err(ServiceError::from)
            .context("failed to get database connection")?;
        crate::database::initialize_database(&conn)
            .await
            .context("failed to apply database schema")?;
    }
    info!(path = %db_path.display(), "Database ready");

    let database = Arc::new(DatabaseImpl::new_from_pool(pool));
    let registry = Arc::new(MonitorRegistry::new(database.clone()));
    let store = Arc::new(StatsStore::new(database));
    let prober = HttpProber::new(config.probe_timeout(), config.monitoring.accept_invalid_certs)
        .context("failed to build HTTP prober")?;
    if config.monitoring.accept_invalid_certs {
        warn!("TLS certificate verification is disabled for probes");
    }

    let scheduler = Arc::new(CheckScheduler::new(
        registry.clone(),
        store.clone(),
        Arc::new(prober),
        config.check_interval(),
        config.drain_timeout(),
    ));
    let facade = Arc::new(
        ServiceFacade::new(registry, store, scheduler.clone())
            .with_probe_budget(config.add_probe_budget()),
    );

    let endpoint = config.bind_endpoint();
    let server = server::spawn(&endpoint, config.zeromq.workers, facade, Handle::current())
        .with_context(|| format!("failed to start server on {endpoint}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c, shutting down: {}", e);
    }
    info!("Shutting down");

    let _ = shutdown_tx.send(true);
    tokio::task::spawn_blocking(move || server.shutdown())
        .await
        .context("server shutdown panicked")?;
    scheduler_task.await.context("scheduler panicked")?;

    info!("Daemon stopped");
    Ok(())
}
