pub mod checker;
/// Monitoring engine - probes endpoints and records the outcomes
///
/// This module is responsible for:
/// - Running one HTTP/HTTPS health check per monitor
/// - Scheduling checks on a fixed interval
/// - Handing outcomes to the stats store
pub mod scheduler;
pub mod types;

pub use checker::{HttpProber, Prober};
pub use scheduler::CheckScheduler;
pub use types::ProbeOutcome;
