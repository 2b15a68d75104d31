use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, uniquely-URLed target under observation.
///
/// Name and URL never change after creation; only `is_active` is mutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub is_active: bool,
}

/// One immutable probe outcome, stamped by the store when it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub monitor_id: i64,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: u64,
    pub is_up: bool,
    pub certificate_expiry: Option<DateTime<Utc>>,
}

/// Activity state of a monitor. Deletion is terminal and leaves no row behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Active,
    Paused,
}

impl MonitorState {
    pub fn from_active(is_active: bool) -> Self {
        if is_active { MonitorState::Active } else { MonitorState::Paused }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Active => "active",
            MonitorState::Paused => "paused",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(MonitorState::Active),
            "paused" => Some(MonitorState::Paused),
            _ => None,
        }
    }
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded transition into `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub monitor_id: i64,
    pub state: MonitorState,
    pub started_at: DateTime<Utc>,
}

/// Counts and mean latency over the checks inside one time window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowAggregate {
    pub total_count: u64,
    pub up_count: u64,
    /// Mean response time over every check in the window, up or down.
    /// `None` when the window holds no checks.
    pub avg_response_time: Option<f64>,
}

impl WindowAggregate {
    /// Share of up checks in percent, or `None` ("no data") for an empty window.
    pub fn uptime_percent(&self) -> Option<f64> {
        if self.total_count == 0 {
            return None;
        }
        Some(self.up_count as f64 * 100.0 / self.total_count as f64)
    }
}

/// Convert a stored millisecond timestamp back to UTC.
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Convert a stored second timestamp back to UTC.
pub fn seconds_to_datetime(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or_default()
}
