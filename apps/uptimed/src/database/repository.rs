use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, TransactionBehavior, params};

use super::models::{
    Check, Monitor, MonitorState, StateTransition, WindowAggregate, millis_to_datetime,
    seconds_to_datetime,
};
use crate::error::{ServiceError, ServiceResult};
use crate::monitoring::types::ProbeOutcome;
use crate::pool::{LibsqlManager, LibsqlPool};

/// Database trait for abstracting persistence operations
///
/// Every method is one logical operation: it takes its own connection from the
/// pool and, when it touches several rows, its own transaction.
#[async_trait]
pub trait Database: Send + Sync {
    /// Create an active monitor; `Conflict` when the name or URL is taken
    async fn insert_monitor(&self, name: &str, url: &str) -> ServiceResult<Monitor>;

    /// Delete a monitor together with its checks and state history
    async fn delete_monitor(&self, name: &str) -> ServiceResult<Monitor>;

    /// Set the active flag; returns the monitor and whether the flag changed
    async fn set_monitor_active(&self, name: &str, active: bool) -> ServiceResult<(Monitor, bool)>;

    /// All monitors, ordered by id
    async fn list_monitors(&self) -> ServiceResult<Vec<Monitor>>;

    async fn find_monitor_by_name(&self, name: &str) -> ServiceResult<Option<Monitor>>;

    async fn find_monitor_by_id(&self, id: i64) -> ServiceResult<Option<Monitor>>;

    /// Append a check stamped `recorded_at`; `NotFound` if the monitor is gone
    async fn insert_check(
        &self,
        monitor_id: i64,
        outcome: &ProbeOutcome,
        recorded_at: DateTime<Utc>,
    ) -> ServiceResult<Check>;

    /// Most recent check by timestamp
    async fn latest_check(&self, monitor_id: i64) -> ServiceResult<Option<Check>>;

    /// Aggregate over checks with `timestamp >= since`
    async fn aggregate_checks(
        &self,
        monitor_id: i64,
        since: DateTime<Utc>,
    ) -> ServiceResult<WindowAggregate>;

    /// Up to `limit` checks, newest first
    async fn recent_checks(&self, monitor_id: i64, limit: u32) -> ServiceResult<Vec<Check>>;

    /// Recorded state transitions, newest first
    async fn state_history(&self, monitor_id: i64) -> ServiceResult<Vec<StateTransition>>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

const MONITOR_COLUMNS: &str = "id, name, url, is_active";
const CHECK_COLUMNS: &str = "monitor_id, checked_at, response_time_ms, is_up, certificate_expiry";

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> ServiceResult<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

fn monitor_from_row(row: &Row) -> ServiceResult<Monitor> {
    Ok(Monitor {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        is_active: row.get::<i64>(3)? != 0,
    })
}

fn check_from_row(row: &Row) -> ServiceResult<Check> {
    Ok(Check {
        monitor_id: row.get(0)?,
        timestamp: millis_to_datetime(row.get(1)?),
        response_time_ms: row.get::<i64>(2)?.max(0) as u64,
        is_up: row.get::<i64>(3)? != 0,
        certificate_expiry: row.get::<Option<i64>>(4)?.map(seconds_to_datetime),
    })
}

fn monitor_not_found(name: &str) -> ServiceError {
    ServiceError::NotFound(format!("monitor '{name}' does not exist"))
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn insert_monitor(&self, name: &str, url: &str) -> ServiceResult<Monitor> {
        let conn = self.get_conn().await?;
        let now = Utc::now().timestamp_millis();

        // IMMEDIATE takes the write lock up front so the uniqueness checks and
        // the insert see the same state.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;

        let mut rows = tx.query("SELECT 1 FROM monitors WHERE name = ?", params![name]).await?;
        if rows.next().await?.is_some() {
            return Err(ServiceError::Conflict(format!("monitor name '{name}' already exists")));
        }

        let mut rows = tx.query("SELECT name FROM monitors WHERE url = ?", params![url]).await?;
        if let Some(row) = rows.next().await? {
            let owner: String = row.get(0)?;
            return Err(ServiceError::Conflict(format!(
                "url '{url}' is already monitored by '{owner}'"
            )));
        }

        tx.execute(
            "INSERT INTO monitors (name, url, is_active, created_at, updated_at) VALUES (?, ?, 1, ?, ?)",
            params![name, url, now, now],
        )
        .await?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO monitor_states (monitor_id, state, started_at) VALUES (?, ?, ?)",
            params![id, MonitorState::Active.as_str(), now],
        )
        .await?;

        tx.commit().await?;

        Ok(Monitor { id, name: name.to_string(), url: url.to_string(), is_active: true })
    }

    async fn delete_monitor(&self, name: &str) -> ServiceResult<Monitor> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;

        let mut rows = tx
            .query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE name = ?"), params![name])
            .await?;
        let monitor = match rows.next().await? {
            Some(row) => monitor_from_row(&row)?,
            None => return Err(monitor_not_found(name)),
        };

        // Explicit deletes rather than relying on ON DELETE CASCADE, so the
        // cascade holds even on connections with foreign keys disabled.
        tx.execute("DELETE FROM checks WHERE monitor_id = ?", params![monitor.id]).await?;
        tx.execute("DELETE FROM monitor_states WHERE monitor_id = ?", params![monitor.id]).await?;
        tx.execute("DELETE FROM monitors WHERE id = ?", params![monitor.id]).await?;

        tx.commit().await?;
        Ok(monitor)
    }

    async fn set_monitor_active(&self, name: &str, active: bool) -> ServiceResult<(Monitor, bool)> {
        let conn = self.get_conn().await?;
        let now = Utc::now().timestamp_millis();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).await?;

        let mut rows = tx
            .query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE name = ?"), params![name])
            .await?;
        let mut monitor = match rows.next().await? {
            Some(row) => monitor_from_row(&row)?,
            None => return Err(monitor_not_found(name)),
        };

        if monitor.is_active == active {
            return Ok((monitor, false));
        }

        tx.execute(
            "UPDATE monitors SET is_active = ?, updated_at = ? WHERE id = ?",
            params![if active { 1 } else { 0 }, now, monitor.id],
        )
        .await?;
        tx.execute(
            "INSERT INTO monitor_states (monitor_id, state, started_at) VALUES (?, ?, ?)",
            params![monitor.id, MonitorState::from_active(active).as_str(), now],
        )
        .await?;

        tx.commit().await?;

        monitor.is_active = active;
        Ok((monitor, true))
    }

    async fn list_monitors(&self) -> ServiceResult<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows =
            conn.query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY id"), ()).await?;

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }
        Ok(monitors)
    }

    async fn find_monitor_by_name(&self, name: &str) -> ServiceResult<Option<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE name = ?"), params![name])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(monitor_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_monitor_by_id(&self, id: i64) -> ServiceResult<Option<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?"), params![id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(monitor_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_check(
        &self,
        monitor_id: i64,
        outcome: &ProbeOutcome,
        recorded_at: DateTime<Utc>,
    ) -> ServiceResult<Check> {
        let conn = self.get_conn().await?;

        // Insert-select so a check can never outlive a concurrently removed monitor.
        let inserted = conn
            .execute(
                "INSERT INTO checks (monitor_id, checked_at, response_time_ms, is_up, certificate_expiry)
                 SELECT id, ?, ?, ?, ? FROM monitors WHERE id = ?",
                params![
                    recorded_at.timestamp_millis(),
                    outcome.response_time_ms.min(i64::MAX as u64) as i64,
                    if outcome.is_up { 1 } else { 0 },
                    outcome.certificate_expiry.map(|at| at.timestamp()),
                    monitor_id
                ],
            )
            .await?;

        if inserted == 0 {
            return Err(ServiceError::NotFound(format!("monitor #{monitor_id} does not exist")));
        }

        Ok(Check {
            monitor_id,
            timestamp: millis_to_datetime(recorded_at.timestamp_millis()),
            response_time_ms: outcome.response_time_ms,
            is_up: outcome.is_up,
            certificate_expiry: outcome
                .certificate_expiry
                .map(|at| seconds_to_datetime(at.timestamp())),
        })
    }

    async fn latest_check(&self, monitor_id: i64) -> ServiceResult<Option<Check>> {
        let mut checks = self.recent_checks(monitor_id, 1).await?;
        Ok(checks.pop())
    }

    async fn aggregate_checks(
        &self,
        monitor_id: i64,
        since: DateTime<Utc>,
    ) -> ServiceResult<WindowAggregate> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(is_up), 0), AVG(response_time_ms)
                 FROM checks WHERE monitor_id = ? AND checked_at >= ?",
                params![monitor_id, since.timestamp_millis()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(WindowAggregate {
                total_count: row.get::<i64>(0)?.max(0) as u64,
                up_count: row.get::<i64>(1)?.max(0) as u64,
                avg_response_time: row.get::<Option<f64>>(2)?,
            }),
            None => Ok(WindowAggregate::default()),
        }
    }

    async fn recent_checks(&self, monitor_id: i64, limit: u32) -> ServiceResult<Vec<Check>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CHECK_COLUMNS} FROM checks WHERE monitor_id = ?
                     ORDER BY checked_at DESC, id DESC LIMIT ?"
                ),
                params![monitor_id, limit as i64],
            )
            .await?;

        let mut checks = Vec::new();
        while let Some(row) = rows.next().await? {
            checks.push(check_from_row(&row)?);
        }
        Ok(checks)
    }

    async fn state_history(&self, monitor_id: i64) -> ServiceResult<Vec<StateTransition>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT monitor_id, state, started_at FROM monitor_states
                 WHERE monitor_id = ? ORDER BY started_at DESC, id DESC",
                params![monitor_id],
            )
            .await?;

        let mut history = Vec::new();
        while let Some(row) = rows.next().await? {
            let raw: String = row.get(1)?;
            let state = MonitorState::parse(&raw)
                .ok_or_else(|| ServiceError::Store(format!("unknown monitor state '{raw}'")))?;
            history.push(StateTransition {
                monitor_id: row.get(0)?,
                state,
                started_at: millis_to_datetime(row.get(2)?),
            });
        }
        Ok(history)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// On-disk database in a temp dir; keep the `TempDir` alive for the test.
    pub(crate) async fn create_test_database() -> (Arc<DatabaseImpl>, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let pool = crate::pool::open_pool(temp_dir.path().join("test.db"), 4).await.unwrap();

        let conn = pool.get().await.unwrap();
        crate::database::initialize_database(&conn).await.unwrap();
        drop(conn);

        (Arc::new(DatabaseImpl::new_from_pool(pool)), temp_dir)
    }

    #[tokio::test]
    async fn test_insert_monitor_rejects_duplicate_name_and_url() {
        let (db, _dir) = create_test_database().await;
        db.insert_monitor("api", "https://example.test").await.unwrap();

        let by_name = db.insert_monitor("api", "https://other.test").await.unwrap_err();
        assert!(matches!(by_name, ServiceError::Conflict(_)));

        let by_url = db.insert_monitor("api-2", "https://example.test").await.unwrap_err();
        assert!(matches!(by_url, ServiceError::Conflict(_)));

        assert_eq!(db.list_monitors().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_monitor_cascades_checks_and_states() {
        let (db, _dir) = create_test_database().await;
        let monitor = db.insert_monitor("api", "https://example.test").await.unwrap();
        for _ in 0..3 {
            db.insert_check(monitor.id, &ProbeOutcome::up(12, None), Utc::now()).await.unwrap();
        }
        db.set_monitor_active("api", false).await.unwrap();

        db.delete_monitor("api").await.unwrap();

        assert!(db.recent_checks(monitor.id, 10).await.unwrap().is_empty());
        assert!(db.state_history(monitor.id).await.unwrap().is_empty());
        assert!(db.find_monitor_by_id(monitor.id).await.unwrap().is_none());
        assert!(matches!(db.delete_monitor("api").await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_insert_check_requires_existing_monitor() {
        let (db, _dir) = create_test_database().await;
        let err = db.insert_check(42, &ProbeOutcome::down(10), Utc::now()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_monitor_active_records_transitions_once() {
        let (db, _dir) = create_test_database().await;
        let monitor = db.insert_monitor("api", "https://example.test").await.unwrap();

        let (paused, changed) = db.set_monitor_active("api", false).await.unwrap();
        assert!(changed);
        assert!(!paused.is_active);

        let (_, changed) = db.set_monitor_active("api", false).await.unwrap();
        assert!(!changed);

        let history = db.state_history(monitor.id).await.unwrap();
        let states: Vec<_> = history.iter().map(|t| t.state).collect();
        assert_eq!(states, vec![MonitorState::Paused, MonitorState::Active]);
    }

    #[tokio::test]
    async fn test_recent_checks_orders_by_timestamp_not_insertion() {
        let (db, _dir) = create_test_database().await;
        let monitor = db.insert_monitor("api", "https://example.test").await.unwrap();
        let now = Utc::now();

        // Completion order differs from timestamp order.
        db.insert_check(monitor.id, &ProbeOutcome::up(2, None), now).await.unwrap();
        db.insert_check(monitor.id, &ProbeOutcome::up(1, None), now - TimeDelta::seconds(30))
            .await
            .unwrap();
        db.insert_check(monitor.id, &ProbeOutcome::up(3, None), now + TimeDelta::seconds(30))
            .await
            .unwrap();

        let times: Vec<u64> = db
            .recent_checks(monitor.id, 10)
            .await
            .unwrap()
            .iter()
            .map(|c| c.response_time_ms)
            .collect();
        assert_eq!(times, vec![3, 2, 1]);

        let latest = db.latest_check(monitor.id).await.unwrap().unwrap();
        assert_eq!(latest.response_time_ms, 3);
    }

    #[tokio::test]
    async fn test_aggregate_checks_filters_by_time() {
        let (db, _dir) = create_test_database().await;
        let monitor = db.insert_monitor("api", "https://example.test").await.unwrap();
        let now = Utc::now();

        db.insert_check(monitor.id, &ProbeOutcome::up(100, None), now).await.unwrap();
        db.insert_check(monitor.id, &ProbeOutcome::down(300), now).await.unwrap();
        db.insert_check(monitor.id, &ProbeOutcome::up(999, None), now - TimeDelta::days(2))
            .await
            .unwrap();

        let day = db.aggregate_checks(monitor.id, now - TimeDelta::days(1)).await.unwrap();
        assert_eq!(day.total_count, 2);
        assert_eq!(day.up_count, 1);
        assert_eq!(day.avg_response_time, Some(200.0));

        let empty = db.aggregate_checks(monitor.id, now + TimeDelta::days(1)).await.unwrap();
        assert_eq!(empty, WindowAggregate::default());
    }
}
