//! Time-series stats over the check log.
//!
//! Checks are appended in probe-completion order, which is not dispatch
//! order, so every aggregate here filters on the stored timestamp range and
//! never on "the last N rows".

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::database::Database;
use crate::database::models::{Check, WindowAggregate};
use crate::error::{ServiceError, ServiceResult};
use crate::monitoring::types::ProbeOutcome;

/// Trailing windows reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Day,
    Month,
}

impl Window {
    pub fn span(self) -> TimeDelta {
        match self {
            Window::Day => TimeDelta::hours(24),
            Window::Month => TimeDelta::days(30),
        }
    }
}

/// Trimmed view of a check for charting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalStat {
    pub response_time_ms: u64,
    pub is_up: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<Check> for HistoricalStat {
    fn from(check: Check) -> Self {
        Self {
            response_time_ms: check.response_time_ms,
            is_up: check.is_up,
            timestamp: check.timestamp,
        }
    }
}

/// Source of "now" for stamping and windowing.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Append-only check log plus derived aggregate queries
pub struct StatsStore {
    database: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
}

impl StatsStore {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self::with_clock(database, Arc::new(SystemClock))
    }

    pub fn with_clock(database: Arc<dyn Database>, clock: Arc<dyn Clock>) -> Self {
        Self { database, clock }
    }

    /// Durably record a probe outcome.
    ///
    /// The timestamp comes from the store's clock at write time, not from when
    /// the probe started, so a slow HTTP call cannot skew the series.
    pub async fn append(&self, monitor_id: i64, outcome: &ProbeOutcome) -> ServiceResult<Check> {
        self.database.insert_check(monitor_id, outcome, self.clock.now()).await
    }

    /// Most recent check, `None` if the monitor was never checked
    pub async fn latest(&self, monitor_id: i64) -> ServiceResult<Option<Check>> {
        self.database.latest_check(monitor_id).await
    }

    /// Counts and mean latency over checks with `timestamp >= now - span`.
    pub async fn aggregate(&self, monitor_id: i64, span: TimeDelta) -> ServiceResult<WindowAggregate> {
        let since = self.clock.now() - span;
        self.database.aggregate_checks(monitor_id, since).await
    }

    pub async fn aggregate_window(
        &self,
        monitor_id: i64,
        window: Window,
    ) -> ServiceResult<WindowAggregate> {
        self.aggregate(monitor_id, window.span()).await
    }

    /// Uptime in percent over the window; `None` means no checks fell inside it.
    pub async fn uptime_percent(&self, monitor_id: i64, span: TimeDelta) -> ServiceResult<Option<f64>> {
        Ok(self.aggregate(monitor_id, span).await?.uptime_percent())
    }

    /// Up to `count` checks, newest first.
    pub async fn recent(&self, monitor_id: i64, count: i64) -> ServiceResult<Vec<Check>> {
        if count <= 0 {
            return Err(ServiceError::InvalidArgument(format!(
                "count must be positive, got {count}"
            )));
        }
        let limit = u32::try_from(count).unwrap_or(u32::MAX);
        self.database.recent_checks(monitor_id, limit).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::repository::tests::create_test_database;
    use std::sync::Mutex;

    /// Clock that only moves when told to.
    pub(crate) struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        pub(crate) fn new(at: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(at)))
        }

        pub(crate) fn advance(&self, by: TimeDelta) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn test_uptime_of_empty_window_is_no_data() {
        let (db, _dir) = create_test_database().await;
        let monitor = db.insert_monitor("api", "https://example.test").await.unwrap();
        let store = StatsStore::new(db);

        assert_eq!(store.uptime_percent(monitor.id, Window::Day.span()).await.unwrap(), None);
        let aggregate = store.aggregate_window(monitor.id, Window::Month).await.unwrap();
        assert_eq!(aggregate.avg_response_time, None);
    }

    #[tokio::test]
    async fn test_uptime_counts_k_of_n() {
        let (db, _dir) = create_test_database().await;
        let monitor = db.insert_monitor("db", "https://db.example.test").await.unwrap();
        let store = StatsStore::new(db);

        for i in 0..10 {
            let outcome = if i < 7 { ProbeOutcome::up(20, None) } else { ProbeOutcome::down(0) };
            store.append(monitor.id, &outcome).await.unwrap();
        }

        let uptime = store.uptime_percent(monitor.id, Window::Day.span()).await.unwrap().unwrap();
        assert!((uptime - 70.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_all_up_is_exactly_one_hundred() {
        let (db, _dir) = create_test_database().await;
        let monitor = db.insert_monitor("api", "https://example.test").await.unwrap();
        let store = StatsStore::new(db);

        for _ in 0..3 {
            store.append(monitor.id, &ProbeOutcome::up(5, None)).await.unwrap();
        }
        assert_eq!(store.uptime_percent(monitor.id, Window::Day.span()).await.unwrap(), Some(100.0));
    }

    #[tokio::test]
    async fn test_average_includes_down_checks() {
        let (db, _dir) = create_test_database().await;
        let monitor = db.insert_monitor("api", "https://example.test").await.unwrap();
        let store = StatsStore::new(db);

        store.append(monitor.id, &ProbeOutcome::up(100, None)).await.unwrap();
        store.append(monitor.id, &ProbeOutcome::up(200, None)).await.unwrap();
        // A timed-out probe records its elapsed time and still counts.
        store.append(monitor.id, &ProbeOutcome::down(10_000)).await.unwrap();
        // A hard failure contributes whatever it took to fail.
        store.append(monitor.id, &ProbeOutcome::down(0)).await.unwrap();

        let aggregate = store.aggregate_window(monitor.id, Window::Month).await.unwrap();
        assert_eq!(aggregate.total_count, 4);
        assert_eq!(aggregate.avg_response_time, Some(2575.0));
    }

    #[tokio::test]
    async fn test_windows_are_relative_to_query_time() {
        let (db, _dir) = create_test_database().await;
        let monitor = db.insert_monitor("api", "https://example.test").await.unwrap();
        let clock = ManualClock::new(Utc::now());
        let store = StatsStore::with_clock(db, clock.clone());

        store.append(monitor.id, &ProbeOutcome::down(50)).await.unwrap();
        clock.advance(TimeDelta::hours(25));
        store.append(monitor.id, &ProbeOutcome::up(50, None)).await.unwrap();

        let day = store.aggregate_window(monitor.id, Window::Day).await.unwrap();
        assert_eq!((day.up_count, day.total_count), (1, 1));
        let month = store.aggregate_window(monitor.id, Window::Month).await.unwrap();
        assert_eq!((month.up_count, month.total_count), (1, 2));

        // Nothing new for two days: the day window empties even though checks exist.
        clock.advance(TimeDelta::days(2));
        assert_eq!(store.uptime_percent(monitor.id, Window::Day.span()).await.unwrap(), None);
        assert_eq!(store.uptime_percent(monitor.id, Window::Month.span()).await.unwrap(), Some(50.0));
    }

    #[tokio::test]
    async fn test_recent_rejects_non_positive_count() {
        let (db, _dir) = create_test_database().await;
        let monitor = db.insert_monitor("api", "https://example.test").await.unwrap();
        let store = StatsStore::new(db);

        for count in [0, -1, i64::MIN] {
            let err = store.recent(monitor.id, count).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidArgument(_)));
        }
    }

    #[tokio::test]
    async fn test_recent_is_bounded_and_newest_first() {
        let (db, _dir) = create_test_database().await;
        let monitor = db.insert_monitor("api", "https://example.test").await.unwrap();
        let clock = ManualClock::new(Utc::now());
        let store = StatsStore::with_clock(db, clock.clone());

        for ms in 1..=5 {
            store.append(monitor.id, &ProbeOutcome::up(ms, None)).await.unwrap();
            clock.advance(TimeDelta::seconds(60));
        }

        let recent: Vec<u64> =
            store.recent(monitor.id, 3).await.unwrap().iter().map(|c| c.response_time_ms).collect();
        assert_eq!(recent, vec![5, 4, 3]);
        assert_eq!(store.recent(monitor.id, 100).await.unwrap().len(), 5);
    }
}
