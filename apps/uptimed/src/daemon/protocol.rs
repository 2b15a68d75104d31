//! Wire protocol between the daemon and its clients.
//!
//! Frames are single JSON documents. A request names its `method` and carries
//! the arguments under `params`; a reply is either `{"ok": <payload>}` or
//! `{"error": {"kind": ..., "message": ...}}`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::database::models::Monitor;
use crate::error::{ServiceError, ServiceResult};
use crate::stats::HistoricalStat;

/// Calls a client can make, one per frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    ListMonitors,
    AddMonitor { name: String, url: String },
    RemoveMonitor { name: String },
    PauseMonitor { name: String },
    ResumeMonitor { name: String },
    GetServiceStatus { name: String },
    GetHistoricalStats { monitor_id: i64, count: i64 },
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::ListMonitors => "ListMonitors",
            Request::AddMonitor { .. } => "AddMonitor",
            Request::RemoveMonitor { .. } => "RemoveMonitor",
            Request::PauseMonitor { .. } => "PauseMonitor",
            Request::ResumeMonitor { .. } => "ResumeMonitor",
            Request::GetServiceStatus { .. } => "GetServiceStatus",
            Request::GetHistoricalStats { .. } => "GetHistoricalStats",
        }
    }
}

/// Successful reply bodies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Monitors(Vec<Monitor>),
    /// Human-readable result of a mutating call
    Confirmation { message: String },
    Status(ServiceStatus),
    History(Vec<HistoricalStat>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ok(Payload),
    Error(ServiceError),
}

impl Reply {
    pub fn into_result(self) -> ServiceResult<Payload> {
        match self {
            Reply::Ok(payload) => Ok(payload),
            Reply::Error(err) => Err(err),
        }
    }
}

impl From<ServiceResult<Payload>> for Reply {
    fn from(result: ServiceResult<Payload>) -> Self {
        match result {
            Ok(payload) => Reply::Ok(payload),
            Err(err) => Reply::Error(err),
        }
    }
}

/// Live view of one monitor, recomputed on every request.
///
/// Every field that depends on recorded checks is optional: `None` means the
/// monitor has no check (at all, or inside that window), never "down" or 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub monitor_id: i64,
    pub monitor_name: String,
    pub url: String,
    pub is_active: bool,

    /// Response time of the most recent check, in milliseconds
    pub last_response_time: Option<u64>,
    pub last_is_up: Option<bool>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_certificate_expiry: Option<DateTime<Utc>>,

    /// Mean response time over the last 30 days, down checks included
    pub avg_response_time: Option<f64>,
    pub uptime_24h: Option<f64>,
    pub uptime_30d: Option<f64>,
}

pub fn encode<T: Serialize>(value: &T) -> ServiceResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> ServiceResult<T> {
    Ok(serde_json::from_slice(frame)?)
}
