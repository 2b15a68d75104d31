//! Monitor registry
//!
//! The database is the only source of truth for monitor identity. The
//! registry keeps a read-through copy of the monitor list for the scheduler
//! and for list calls; every mutation bumps a generation counter so the copy
//! is rebuilt on the next read and a fill that raced a mutation is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::database::Database;
use crate::database::models::{Monitor, StateTransition};
use crate::error::{ServiceError, ServiceResult};
use crate::validation::{validate_http_endpoint, validate_monitor_name};

struct CachedList {
    generation: u64,
    monitors: Arc<Vec<Monitor>>,
}

pub struct MonitorRegistry {
    database: Arc<dyn Database>,
    generation: AtomicU64,
    cache: RwLock<Option<CachedList>>,
}

impl MonitorRegistry {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database, generation: AtomicU64::new(0), cache: RwLock::new(None) }
    }

    /// Create an active monitor; `Conflict` if the name or URL is already used.
    pub async fn add(&self, name: &str, url: &str) -> ServiceResult<Monitor> {
        validate_monitor_name(name)?;
        validate_http_endpoint(url)?;

        let monitor = self.database.insert_monitor(name, url).await?;
        self.invalidate();
        info!(id = monitor.id, name = %monitor.name, url = %monitor.url, "Monitor added");
        Ok(monitor)
    }

    /// Delete a monitor and, in the same transaction, its whole check history.
    pub async fn remove(&self, name: &str) -> ServiceResult<Monitor> {
        let monitor = self.database.delete_monitor(name).await?;
        self.invalidate();
        info!(id = monitor.id, name = %monitor.name, "Monitor removed");
        Ok(monitor)
    }

    /// Stop probing a monitor. Pausing a paused monitor is not an error.
    pub async fn pause(&self, name: &str) -> ServiceResult<Monitor> {
        self.set_active(name, false).await
    }

    /// Resume probing a monitor. Resuming an active monitor is not an error.
    pub async fn resume(&self, name: &str) -> ServiceResult<Monitor> {
        self.set_active(name, true).await
    }

    async fn set_active(&self, name: &str, active: bool) -> ServiceResult<Monitor> {
        let (monitor, changed) = self.database.set_monitor_active(name, active).await?;
        if changed {
            self.invalidate();
            info!(name = %monitor.name, state = if active { "active" } else { "paused" }, "Monitor state changed");
        }
        Ok(monitor)
    }

    /// Snapshot of every monitor, ordered by id.
    pub async fn list(&self) -> ServiceResult<Arc<Vec<Monitor>>> {
        let generation = self.generation.load(Ordering::Acquire);

        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.generation == generation {
                return Ok(cached.monitors.clone());
            }
        }

        let monitors = Arc::new(self.database.list_monitors().await?);

        // Only publish the fill if no mutation happened while we were reading.
        if self.generation.load(Ordering::Acquire) == generation {
            *self.cache.write().await = Some(CachedList { generation, monitors: monitors.clone() });
        } else {
            debug!("Monitor list changed during refresh, not caching it");
        }

        Ok(monitors)
    }

    pub async fn get(&self, name: &str) -> ServiceResult<Monitor> {
        self.database
            .find_monitor_by_name(name)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("monitor '{name}' does not exist")))
    }

    pub async fn get_by_id(&self, id: i64) -> ServiceResult<Monitor> {
        self.database
            .find_monitor_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("monitor #{id} does not exist")))
    }

    /// Active/paused transitions for a monitor, newest first.
    pub async fn history(&self, name: &str) -> ServiceResult<Vec<StateTransition>> {
        let monitor = self.get(name).await?;
        self.database.state_history(monitor.id).await
    }

    fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}
