use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::daemon::protocol::{Payload, Reply, Request, ServiceStatus, decode, encode};
use crate::database::models::Monitor;
use crate::error::{ServiceError, ServiceResult};
use crate::stats::HistoricalStat;

/// Calls a display or CLI makes against the daemon
pub trait MonitorApi {
    fn list_monitors(&mut self) -> ServiceResult<Vec<Monitor>>;
    fn add_monitor(&mut self, name: &str, url: &str) -> ServiceResult<String>;
    fn remove_monitor(&mut self, name: &str) -> ServiceResult<String>;
    fn pause_monitor(&mut self, name: &str) -> ServiceResult<String>;
    fn resume_monitor(&mut self, name: &str) -> ServiceResult<String>;
    fn service_status(&mut self, name: &str) -> ServiceResult<ServiceStatus>;
    fn historical_stats(&mut self, monitor_id: i64, count: i64) -> ServiceResult<Vec<HistoricalStat>>;
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub endpoint: String,
    /// Longest wait for a reply before the connection counts as lost
    pub request_timeout: Duration,
    /// Pause before the single reconnect attempt
    pub reconnect_backoff: Duration,
}

impl ClientOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout: Duration::from_secs(5),
            reconnect_backoff: Duration::from_secs(1),
        }
    }
}

/// Blocking connection to the daemon.
///
/// One request is in flight at a time. When an exchange fails or times out
/// the socket is thrown away, the client waits `reconnect_backoff`, opens a
/// fresh socket and sends the same request once more. If that fails too the
/// error goes back to the caller; there is no retry loop.
pub struct DaemonClient {
    context: zmq::Context,
    options: ClientOptions,
    socket: Option<zmq::Socket>,
    reconnects: u64,
}

impl DaemonClient {
    pub fn connect(options: ClientOptions) -> ServiceResult<Self> {
        let mut client =
            Self { context: zmq::Context::new(), options, socket: None, reconnects: 0 };
        client.socket = Some(client.open_socket()?);
        Ok(client)
    }

    /// Reconnect attempts made so far
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn call(&mut self, request: &Request) -> ServiceResult<Payload> {
        let frame = encode(request)?;

        let reply = match self.exchange(&frame) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    endpoint = %self.options.endpoint,
                    backoff_ms = self.options.reconnect_backoff.as_millis() as u64,
                    "Lost connection to daemon ({}), reconnecting",
                    e
                );
                thread::sleep(self.options.reconnect_backoff);
                self.reconnects += 1;
                self.exchange(&frame).map_err(|e| {
                    e.with_context(format!("daemon at {} unreachable", self.options.endpoint))
                })?
            }
        };

        decode::<Reply>(&reply)?.into_result()
    }

    /// One send/receive on the current socket, opening one first if needed.
    /// The socket is kept only if the exchange succeeded.
    fn exchange(&mut self, frame: &[u8]) -> ServiceResult<Vec<u8>> {
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => self.open_socket()?,
        };

        let reply = socket.send(frame, 0).and_then(|()| socket.recv_bytes(0)).map_err(|e| match e {
            zmq::Error::EAGAIN => ServiceError::Transport("request timed out".to_string()),
            e => ServiceError::from(e),
        })?;

        self.socket = Some(socket);
        Ok(reply)
    }

    fn open_socket(&self) -> ServiceResult<zmq::Socket> {
        let timeout = i32::try_from(self.options.request_timeout.as_millis()).unwrap_or(i32::MAX);

        let socket = self.context.socket(zmq::REQ)?;
        socket.set_linger(0)?;
        socket.set_rcvtimeo(timeout)?;
        socket.set_sndtimeo(timeout)?;
        socket.connect(&self.options.endpoint)?;

        debug!(endpoint = %self.options.endpoint, "Connected to daemon");
        Ok(socket)
    }

    fn confirmation(&mut self, request: Request) -> ServiceResult<String> {
        match self.call(&request)? {
            Payload::Confirmation { message } => Ok(message),
            other => Err(unexpected(&request, &other)),
        }
    }
}

fn unexpected(request: &Request, payload: &Payload) -> ServiceError {
    ServiceError::Transport(format!("unexpected reply to {}: {payload:?}", request.method()))
}

impl MonitorApi for DaemonClient {
    fn list_monitors(&mut self) -> ServiceResult<Vec<Monitor>> {
        let request = Request::ListMonitors;
        match self.call(&request)? {
            Payload::Monitors(monitors) => Ok(monitors),
            other => Err(unexpected(&request, &other)),
        }
    }

    fn add_monitor(&mut self, name: &str, url: &str) -> ServiceResult<String> {
        self.confirmation(Request::AddMonitor { name: name.to_string(), url: url.to_string() })
    }

    fn remove_monitor(&mut self, name: &str) -> ServiceResult<String> {
        self.confirmation(Request::RemoveMonitor { name: name.to_string() })
    }

    fn pause_monitor(&mut self, name: &str) -> ServiceResult<String> {
        self.confirmation(Request::PauseMonitor { name: name.to_string() })
    }

    fn resume_monitor(&mut self, name: &str) -> ServiceResult<String> {
        self.confirmation(Request::ResumeMonitor { name: name.to_string() })
    }

    fn service_status(&mut self, name: &str) -> ServiceResult<ServiceStatus> {
        let request = Request::GetServiceStatus { name: name.to_string() };
        match self.call(&request)? {
            Payload::Status(status) => Ok(status),
            other => Err(unexpected(&request, &other)),
        }
    }

    fn historical_stats(&mut self, monitor_id: i64, count: i64) -> ServiceResult<Vec<HistoricalStat>> {
        let request = Request::GetHistoricalStats { monitor_id, count };
        match self.call(&request)? {
            Payload::History(history) => Ok(history),
            other => Err(unexpected(&request, &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::server;
    use crate::daemon::service::tests::{harness, harness_with_budget};
    use crate::monitoring::checker::Prober;
    use crate::monitoring::ProbeOutcome;
    use crate::monitoring::scheduler::tests::ScriptedProber;
    use std::sync::Arc;
    use tokio::runtime::Handle;

    fn ipc_endpoint(dir: &tempfile::TempDir) -> String {
        format!("ipc://{}", dir.path().join("uptimed.sock").display())
    }

    fn options(endpoint: &str, timeout_ms: u64, backoff_ms: u64) -> ClientOptions {
        ClientOptions {
            endpoint: endpoint.to_string(),
            request_timeout: Duration::from_millis(timeout_ms),
            reconnect_backoff: Duration::from_millis(backoff_ms),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_end_to_end_calls() {
        let h = harness(ScriptedProber::new([ProbeOutcome::up(12, None)])).await;
        let dir = tempfile::tempdir().unwrap();
        let endpoint = ipc_endpoint(&dir);
        let server = server::spawn(&endpoint, 2, h.facade.clone(), Handle::current()).unwrap();

        let opts = options(&endpoint, 5_000, 100);
        tokio::task::spawn_blocking(move || {
            let mut client = DaemonClient::connect(opts).unwrap();

            let message = client.add_monitor("api", "https://example.test").unwrap();
            assert_eq!(message, "Monitor 'api' added for https://example.test");

            let err = client.add_monitor("api", "https://example.test").unwrap_err();
            assert!(matches!(err, ServiceError::Conflict(_)));

            let monitors = client.list_monitors().unwrap();
            assert_eq!(monitors.len(), 1);

            let status = client.service_status("api").unwrap();
            assert_eq!(status.last_is_up, Some(true));
            assert_eq!(status.uptime_24h, Some(100.0));

            let history = client.historical_stats(monitors[0].id, 30).unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].response_time_ms, 12);

            let err = client.historical_stats(monitors[0].id, 0).unwrap_err();
            assert!(matches!(err, ServiceError::InvalidArgument(_)));

            assert_eq!(client.pause_monitor("api").unwrap(), "Monitor 'api' paused");
            assert!(matches!(client.resume_monitor("ghost"), Err(ServiceError::NotFound(_))));
            assert_eq!(client.reconnects(), 0);
        })
        .await
        .unwrap();

        tokio::task::spawn_blocking(move || server.shutdown()).await.unwrap();
    }

    /// Answers after a fixed delay, longer than the client will wait.
    struct SlowProber(Duration);

    #[async_trait::async_trait]
    impl Prober for SlowProber {
        async fn probe(&self, _url: &str) -> ProbeOutcome {
            tokio::time::sleep(self.0).await;
            ProbeOutcome::up(7, None)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_add_replies_before_a_slow_first_check() {
        let prober = Arc::new(SlowProber(Duration::from_millis(600)));
        let h = harness_with_budget(prober, Duration::from_millis(100)).await;
        let dir = tempfile::tempdir().unwrap();
        let endpoint = ipc_endpoint(&dir);
        let server = server::spawn(&endpoint, 2, h.facade.clone(), Handle::current()).unwrap();

        let opts = options(&endpoint, 400, 100);
        let monitor_id = tokio::task::spawn_blocking(move || {
            let mut client = DaemonClient::connect(opts).unwrap();

            let message = client.add_monitor("api", "https://slow.example.test").unwrap();
            assert_eq!(message, "Monitor 'api' added for https://slow.example.test");
            assert_eq!(client.reconnects(), 0);

            let monitors = client.list_monitors().unwrap();
            assert_eq!(monitors.len(), 1);
            monitors[0].id
        })
        .await
        .unwrap();

        // The first check keeps running after the reply and lands later.
        let mut recorded = 0;
        for _ in 0..40 {
            recorded = h.store.recent(monitor_id, 30).await.unwrap().len();
            if recorded > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(recorded, 1);

        tokio::task::spawn_blocking(move || server.shutdown()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reconnects_once_and_succeeds_when_daemon_returns() {
        let h = harness(ScriptedProber::new(Vec::new())).await;
        let dir = tempfile::tempdir().unwrap();
        let endpoint = ipc_endpoint(&dir);

        // Stand-in daemon that takes one request and dies without answering.
        let stub_context = zmq::Context::new();
        let stub = stub_context.socket(zmq::REP).unwrap();
        stub.set_linger(0).unwrap();
        stub.bind(&endpoint).unwrap();

        let opts = options(&endpoint, 750, 200);
        let client_task = tokio::task::spawn_blocking(move || {
            let mut client = DaemonClient::connect(opts).unwrap();
            let result = client.list_monitors();
            (result, client.reconnects())
        });

        tokio::task::spawn_blocking(move || {
            stub.recv_bytes(0).unwrap();
            drop(stub);
        })
        .await
        .unwrap();

        let server = server::spawn(&endpoint, 1, h.facade.clone(), Handle::current()).unwrap();

        let (result, reconnects) = client_task.await.unwrap();
        assert_eq!(result.unwrap(), Vec::new());
        assert_eq!(reconnects, 1);

        tokio::task::spawn_blocking(move || server.shutdown()).await.unwrap();
    }

    #[test]
    fn test_second_failure_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = DaemonClient::connect(options(&ipc_endpoint(&dir), 200, 50)).unwrap();

        let err = client.list_monitors().unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)));
        assert_eq!(client.reconnects(), 1);
    }
}
