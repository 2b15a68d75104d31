use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::protocol::{Payload, Reply, Request, ServiceStatus};
use crate::database::models::Monitor;
use crate::error::{ServiceError, ServiceResult};
use crate::monitoring::CheckScheduler;
use crate::registry::MonitorRegistry;
use crate::stats::{HistoricalStat, StatsStore, Window};

/// Longest an `AddMonitor` reply waits for the monitor's first check
pub const DEFAULT_ADD_PROBE_BUDGET: Duration = Duration::from_secs(3);

/// Request/reply surface of the daemon.
///
/// Each call maps onto one registry or stats operation. Mutations answer with
/// a confirmation sentence; failures keep their kind and gain a sentence of
/// context naming the operation.
pub struct ServiceFacade {
    registry: Arc<MonitorRegistry>,
    store: Arc<StatsStore>,
    scheduler: Arc<CheckScheduler>,
    probe_budget: Duration,
}

impl ServiceFacade {
    pub fn new(
        registry: Arc<MonitorRegistry>,
        store: Arc<StatsStore>,
        scheduler: Arc<CheckScheduler>,
    ) -> Self {
        Self { registry, store, scheduler, probe_budget: DEFAULT_ADD_PROBE_BUDGET }
    }

    /// Cap the wait for the first check after an add.
    ///
    /// Keep this below the clients' request timeout: a reply that arrives
    /// after it is treated as a lost connection and the add is sent again.
    pub fn with_probe_budget(mut self, budget: Duration) -> Self {
        self.probe_budget = budget;
        self
    }

    pub async fn dispatch(&self, request: Request) -> Reply {
        let method = request.method();
        debug!(method, "Handling request");

        let result = match request {
            Request::ListMonitors => self.list_monitors().await.map(Payload::Monitors),
            Request::AddMonitor { name, url } => self.add_monitor(&name, &url).await.map(confirm),
            Request::RemoveMonitor { name } => self.remove_monitor(&name).await.map(confirm),
            Request::PauseMonitor { name } => self.pause_monitor(&name).await.map(confirm),
            Request::ResumeMonitor { name } => self.resume_monitor(&name).await.map(confirm),
            Request::GetServiceStatus { name } => self.service_status(&name).await.map(Payload::Status),
            Request::GetHistoricalStats { monitor_id, count } => {
                self.historical_stats(monitor_id, count).await.map(Payload::History)
            }
        };

        match &result {
            Err(ServiceError::Store(message)) => warn!(method, "Request failed: {}", message),
            Err(err) => debug!(method, "Request rejected: {}", err),
            Ok(_) => {}
        }

        Reply::from(result)
    }

    pub async fn list_monitors(&self) -> ServiceResult<Vec<Monitor>> {
        Ok(self.registry.list().await?.as_ref().clone())
    }

    /// Register a monitor and probe it once right away, so it has a check
    /// before the first tick reaches it. The reply waits for that check only
    /// up to the probe budget.
    pub async fn add_monitor(&self, name: &str, url: &str) -> ServiceResult<String> {
        let monitor = self
            .registry
            .add(name, url)
            .await
            .map_err(|e| e.with_context(format!("Failed to add monitor {name} for {url}")))?;

        self.scheduler.probe_now(&monitor, self.probe_budget).await;
        Ok(format!("Monitor '{}' added for {}", monitor.name, monitor.url))
    }

    pub async fn remove_monitor(&self, name: &str) -> ServiceResult<String> {
        self.registry
            .remove(name)
            .await
            .map_err(|e| e.with_context(format!("Failed to remove monitor {name}")))?;
        Ok(format!("Monitor '{name}' removed"))
    }

    pub async fn pause_monitor(&self, name: &str) -> ServiceResult<String> {
        self.registry
            .pause(name)
            .await
            .map_err(|e| e.with_context(format!("Failed to pause monitor {name}")))?;
        Ok(format!("Monitor '{name}' paused"))
    }

    pub async fn resume_monitor(&self, name: &str) -> ServiceResult<String> {
        self.registry
            .resume(name)
            .await
            .map_err(|e| e.with_context(format!("Failed to resume monitor {name}")))?;
        Ok(format!("Monitor '{name}' resumed"))
    }

    pub async fn service_status(&self, name: &str) -> ServiceResult<ServiceStatus> {
        let monitor = self.registry.get(name).await?;
        let latest = self.store.latest(monitor.id).await?;
        let day = self.store.aggregate_window(monitor.id, Window::Day).await?;
        let month = self.store.aggregate_window(monitor.id, Window::Month).await?;

        Ok(ServiceStatus {
            monitor_id: monitor.id,
            monitor_name: monitor.name,
            url: monitor.url,
            is_active: monitor.is_active,
            last_response_time: latest.as_ref().map(|c| c.response_time_ms),
            last_is_up: latest.as_ref().map(|c| c.is_up),
            last_checked_at: latest.as_ref().map(|c| c.timestamp),
            last_certificate_expiry: latest.and_then(|c| c.certificate_expiry),
            avg_response_time: month.avg_response_time,
            uptime_24h: day.uptime_percent(),
            uptime_30d: month.uptime_percent(),
        })
    }

    /// Up to `count` most recent checks of a monitor, newest first.
    pub async fn historical_stats(
        &self,
        monitor_id: i64,
        count: i64,
    ) -> ServiceResult<Vec<HistoricalStat>> {
        if count <= 0 {
            return Err(ServiceError::InvalidArgument(format!(
                "count must be positive, got {count}"
            )));
        }
        self.registry.get_by_id(monitor_id).await?;

        let checks = self.store.recent(monitor_id, count).await?;
        Ok(checks.into_iter().map(HistoricalStat::from).collect())
    }
}

fn confirm(message: String) -> Payload {
    info!("{}", message);
    Payload::Confirmation { message }
}
