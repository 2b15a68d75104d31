use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::debug;

use super::types::ProbeOutcome;
use crate::error::{ServiceError, ServiceResult};

/// Default bound on a single probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Prober trait - one health check against one URL
///
/// Implementations never retry and never fail: every problem is folded into
/// a down [`ProbeOutcome`].
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// HTTP/HTTPS prober issuing a single GET per probe
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Build a prober with a bounded per-request timeout.
    ///
    /// `accept_invalid_certs` disables certificate and hostname verification so
    /// self-signed or internal endpoints can be watched. This reduces TLS
    /// guarantees to "encrypted, unauthenticated" and should only be enabled
    /// for endpoints you already trust.
    pub fn new(timeout: Duration, accept_invalid_certs: bool) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .tls_info(true)
            .build()
            .map_err(|e| ServiceError::InvalidArgument(format!("HTTP client setup: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        let start = Instant::now();

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                let elapsed = elapsed_millis(start);
                debug!(%url, elapsed_ms = elapsed, "Probe failed: {}", e);
                return ProbeOutcome::down(elapsed);
            }
        };

        let elapsed = elapsed_millis(start);
        let status = response.status();
        let certificate_expiry = response
            .extensions()
            .get::<reqwest::tls::TlsInfo>()
            .and_then(|info| info.peer_certificate())
            .and_then(certificate_not_after);

        debug!(%url, status = status.as_u16(), elapsed_ms = elapsed, "Probe answered");
        ProbeOutcome::answered(elapsed, status.is_success(), certificate_expiry)
    }
}

fn elapsed_millis(start: Instant) -> u64 {
    start.elapsed().as_millis().min(u64::MAX as u128) as u64
}

/// Read `notAfter` from a DER-encoded certificate.
pub fn certificate_not_after(der: &[u8]) -> Option<DateTime<Utc>> {
    let (_, certificate) = x509_parser::parse_x509_certificate(der).ok()?;
    DateTime::from_timestamp(certificate.validity().not_after.timestamp(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response =
                    format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}/health")
    }

    #[tokio::test]
    async fn test_probe_2xx_is_up_without_certificate() {
        let url = serve_once("204 No Content").await;
        let prober = HttpProber::new(Duration::from_secs(5), false).unwrap();

        let outcome = prober.probe(&url).await;
        assert!(outcome.is_up);
        assert!(outcome.certificate_expiry.is_none());
    }

    #[tokio::test]
    async fn test_probe_5xx_is_down() {
        let url = serve_once("503 Service Unavailable").await;
        let prober = HttpProber::new(Duration::from_secs(5), false).unwrap();

        assert!(!prober.probe(&url).await.is_up);
    }

    #[tokio::test]
    async fn test_probe_connection_refused_is_down() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = HttpProber::new(Duration::from_secs(2), false).unwrap();
        let outcome = prober.probe(&format!("http://{addr}/")).await;
        assert!(!outcome.is_up);
        assert!(outcome.certificate_expiry.is_none());
    }

    #[tokio::test]
    async fn test_probe_timeout_reports_elapsed_time() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and never answer.
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let prober = HttpProber::new(Duration::from_millis(300), false).unwrap();
        let outcome = prober.probe(&format!("http://{addr}/")).await;
        assert!(!outcome.is_up);
        assert!(outcome.response_time_ms >= 250, "got {}ms", outcome.response_time_ms);
    }

    #[test]
    fn test_certificate_not_after_reads_expiry() {
        // Self-signed for localhost, valid until 2031-05-17 12:00:00 UTC.
        let der = include_bytes!("testdata/localhost.der");
        let expected = Utc.with_ymd_and_hms(2031, 5, 17, 12, 0, 0).unwrap();
        assert_eq!(certificate_not_after(der), Some(expected));
    }

    #[test]
    fn test_certificate_not_after_rejects_garbage() {
        assert!(certificate_not_after(b"not a certificate").is_none());
    }
}
