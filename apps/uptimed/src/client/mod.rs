/// Client side of uptimed
///
/// Blocking connection to the daemon plus the cached view a display session
/// renders from.
pub mod cache;
pub mod connection;
pub mod layout;

pub use cache::{CachedMonitor, RefreshReport, StatusCache};
pub use connection::{ClientOptions, DaemonClient, MonitorApi};
pub use layout::{BarChartLayout, HistoryCapacity};

use crate::config::Config;
use crate::error::ServiceResult;

/// Connect using the `[zeromq]` and `[client]` settings.
pub fn connect(config: &Config) -> ServiceResult<DaemonClient> {
    DaemonClient::connect(ClientOptions {
        endpoint: config.client_endpoint(),
        request_timeout: config.request_timeout(),
        reconnect_backoff: config.reconnect_backoff(),
    })
}
