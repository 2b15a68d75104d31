use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single probe against one URL.
///
/// Probes never fail: transport errors and timeouts come back as a down
/// outcome carrying the elapsed wall time, so they land in the log as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// Wall time from request start until headers arrived (or the failure)
    pub response_time_ms: u64,

    /// True iff the final response status was in [200, 300)
    pub is_up: bool,

    /// Leaf certificate `notAfter`, when TLS was negotiated
    pub certificate_expiry: Option<DateTime<Utc>>,
}

impl ProbeOutcome {
    /// The endpoint answered; `is_up` reflects the status class
    pub fn answered(
        response_time_ms: u64,
        is_up: bool,
        certificate_expiry: Option<DateTime<Utc>>,
    ) -> Self {
        Self { response_time_ms, is_up, certificate_expiry }
    }

    /// A 2xx answer
    pub fn up(response_time_ms: u64, certificate_expiry: Option<DateTime<Utc>>) -> Self {
        Self { response_time_ms, is_up: true, certificate_expiry }
    }

    /// A transport failure or timeout; no certificate data is reported
    pub fn down(response_time_ms: u64) -> Self {
        Self { response_time_ms, is_up: false, certificate_expiry: None }
    }
}
