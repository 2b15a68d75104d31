use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use super::checker::Prober;
use crate::database::models::Monitor;
use crate::registry::MonitorRegistry;
use crate::stats::StatsStore;

/// Default time between ticks
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Monitor ids with a probe currently running.
type InFlight = Arc<Mutex<HashSet<i64>>>;

/// Releases a monitor's in-flight slot when its probe task ends, however it ends.
struct InFlightGuard {
    in_flight: InFlight,
    monitor_id: i64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.monitor_id);
    }
}

/// Check scheduler - probes every active monitor once per interval
///
/// Each tick fans out into one task per monitor. A monitor whose previous
/// probe is still running is skipped for that tick, which bounds the number
/// of concurrent probes to the number of monitors even when endpoints are
/// slower than the interval.
pub struct CheckScheduler {
    registry: Arc<MonitorRegistry>,
    store: Arc<StatsStore>,
    prober: Arc<dyn Prober>,
    interval: Duration,
    drain_timeout: Duration,
    in_flight: InFlight,
}

impl CheckScheduler {
    pub fn new(
        registry: Arc<MonitorRegistry>,
        store: Arc<StatsStore>,
        prober: Arc<dyn Prober>,
        interval: Duration,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            prober,
            interval,
            drain_timeout,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Drive ticks until `shutdown` flips to true, then drain in-flight probes.
    ///
    /// The first tick fires one full interval after start.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut timer = interval_at(Instant::now() + self.interval, self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut outstanding: Vec<JoinHandle<()>> = Vec::new();

        info!(interval_secs = self.interval.as_secs(), "Check scheduler started");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    outstanding.retain(|handle| !handle.is_finished());
                    outstanding.extend(self.tick().await);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        outstanding.retain(|handle| !handle.is_finished());
        info!(pending = outstanding.len(), "Check scheduler stopping, draining probes");

        let drain = futures::future::join_all(outstanding);
        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            warn!(
                timeout_secs = self.drain_timeout.as_secs(),
                "Probes still running after drain timeout, abandoning them"
            );
        }
    }

    /// Run one tick: snapshot the registry and dispatch a probe task for every
    /// active monitor that is not already being probed.
    ///
    /// Returns the handles of the dispatched tasks without awaiting them.
    pub async fn tick(&self) -> Vec<JoinHandle<()>> {
        let monitors = match self.registry.list().await {
            Ok(monitors) => monitors,
            Err(e) => {
                warn!("Failed to list monitors for tick: {}", e);
                return Vec::new();
            }
        };

        let mut handles = Vec::new();
        let mut skipped = 0usize;

        for monitor in monitors.iter().filter(|m| m.is_active) {
            match self.dispatch(monitor) {
                Some(handle) => handles.push(handle),
                None => {
                    skipped += 1;
                    debug!(name = %monitor.name, "Previous probe still running, skipping this tick");
                }
            }
        }

        debug!(dispatched = handles.len(), skipped, "Tick dispatched");
        handles
    }

    /// Probe one monitor immediately, outside the tick cadence, waiting at
    /// most `budget` for the check to be recorded.
    ///
    /// Used right after a monitor is added so it has a check before the next
    /// tick. A probe still running when the budget runs out keeps going in the
    /// background and records its check when it finishes. Returns whether the
    /// check was recorded within the budget; failures are logged, never returned.
    pub async fn probe_now(&self, monitor: &Monitor, budget: Duration) -> bool {
        let Some(handle) = self.dispatch(monitor) else {
            debug!(name = %monitor.name, "Probe already running, not probing again");
            return false;
        };

        match tokio::time::timeout(budget, handle).await {
            Ok(joined) => joined.is_ok(),
            Err(_) => {
                debug!(
                    name = %monitor.name,
                    budget_ms = budget.as_millis() as u64,
                    "Initial probe still running, not waiting for it"
                );
                false
            }
        }
    }

    /// Number of monitors with a probe currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn claim(&self, monitor_id: i64) -> Option<InFlightGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(monitor_id) {
            return None;
        }
        Some(InFlightGuard { in_flight: self.in_flight.clone(), monitor_id })
    }

    /// Spawn a probe task for `monitor` unless one is already running.
    fn dispatch(&self, monitor: &Monitor) -> Option<JoinHandle<()>> {
        let guard = self.claim(monitor.id)?;
        let monitor = monitor.clone();
        let prober = self.prober.clone();
        let store = self.store.clone();

        Some(tokio::spawn(async move {
            let _guard = guard;
            probe_and_record(prober.as_ref(), store.as_ref(), &monitor).await;
        }))
    }
}

async fn probe_and_record(prober: &dyn Prober, store: &StatsStore, monitor: &Monitor) {
    let outcome = prober.probe(&monitor.url).await;

    match store.append(monitor.id, &outcome).await {
        Ok(check) => debug!(
            name = %monitor.name,
            is_up = check.is_up,
            response_time_ms = check.response_time_ms,
            "Check recorded"
        ),
        Err(e) => warn!(name = %monitor.name, "Failed to record check: {}", e),
    }
}
