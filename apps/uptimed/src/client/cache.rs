//! Client-side copy of what the daemon last reported.
//!
//! The cache is refreshed per monitor: one monitor failing to refresh keeps
//! its previous values and never touches the others.

use std::collections::HashMap;

use super::connection::MonitorApi;
use super::layout::HistoryCapacity;
use crate::daemon::protocol::ServiceStatus;
use crate::database::models::Monitor;
use crate::error::{ServiceError, ServiceResult};
use crate::stats::HistoricalStat;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedMonitor {
    pub monitor: Monitor,
    /// Last status fetched successfully
    pub status: Option<ServiceStatus>,
    /// Newest first, never longer than the current capacity
    pub history: Vec<HistoricalStat>,
}

impl CachedMonitor {
    fn new(monitor: Monitor) -> Self {
        Self { monitor, status: None, history: Vec::new() }
    }
}

/// Per-monitor failures of one refresh or resize
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub failures: Vec<(String, ServiceError)>,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct StatusCache<A, L> {
    api: A,
    layout: L,
    width: u16,
    /// In the order the daemon lists them
    entries: Vec<CachedMonitor>,
}

impl<A: MonitorApi, L: HistoryCapacity> StatusCache<A, L> {
    pub fn new(api: A, layout: L, width: u16) -> Self {
        Self { api, layout, width, entries: Vec::new() }
    }

    /// History entries kept per monitor at the current width
    pub fn capacity(&self) -> usize {
        self.layout.capacity(self.width)
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn entries(&self) -> &[CachedMonitor] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&CachedMonitor> {
        self.entries.iter().find(|entry| entry.monitor.name == name)
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    /// Re-read the monitor list, then every monitor's status and history.
    ///
    /// Fails only if the list itself cannot be fetched, in which case the
    /// cache is left untouched. Monitors the daemon no longer lists are dropped.
    pub fn refresh(&mut self) -> ServiceResult<RefreshReport> {
        let monitors = self.api.list_monitors()?;
        let capacity = self.capacity();

        let mut previous: HashMap<String, CachedMonitor> =
            self.entries.drain(..).map(|entry| (entry.monitor.name.clone(), entry)).collect();
        let mut report = RefreshReport::default();

        for monitor in monitors {
            let mut entry = match previous.remove(&monitor.name) {
                // Same name under a new id was removed and re-added; start over.
                Some(entry) if entry.monitor.id == monitor.id => CachedMonitor { monitor, ..entry },
                _ => CachedMonitor::new(monitor),
            };

            match self.api.service_status(&entry.monitor.name) {
                Ok(status) => entry.status = Some(status),
                Err(e) => report.failures.push((entry.monitor.name.clone(), e)),
            }
            if let Err(e) = fetch_history(&mut self.api, &mut entry, capacity) {
                report.failures.push((entry.monitor.name.clone(), e));
            }

            self.entries.push(entry);
        }

        Ok(report)
    }

    /// Adapt the history windows to a new display width.
    ///
    /// Shrinking trims locally; growing fetches the longer window.
    pub fn resize(&mut self, width: u16) -> RefreshReport {
        let old_capacity = self.capacity();
        self.width = width;
        let capacity = self.capacity();
        let mut report = RefreshReport::default();

        if capacity < old_capacity {
            for entry in &mut self.entries {
                entry.history.truncate(capacity);
            }
        } else if capacity > old_capacity {
            for entry in &mut self.entries {
                if let Err(e) = fetch_history(&mut self.api, entry, capacity) {
                    report.failures.push((entry.monitor.name.clone(), e));
                }
            }
        }

        report
    }
}

fn fetch_history<A: MonitorApi>(
    api: &mut A,
    entry: &mut CachedMonitor,
    capacity: usize,
) -> ServiceResult<()> {
    if capacity == 0 {
        entry.history.clear();
        return Ok(());
    }

    let count = i64::try_from(capacity).unwrap_or(i64::MAX);
    let mut history = api.historical_stats(entry.monitor.id, count)?;
    history.truncate(capacity);
    entry.history = history;
    Ok(())
}
