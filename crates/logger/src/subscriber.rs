use std::env::var;

use tracing::{Subscriber, level_filters::LevelFilter, warn};
use tracing_subscriber::{
    Layer,
    filter::EnvFilter,
    fmt::MakeWriter,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

pub fn init() {
    init_with_level(LevelFilter::INFO);
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`; `RUST_LOG_FORMAT=json` switches
/// to structured output for log shippers. Either format goes to stderr so
/// command output on stdout stays clean. Calling this twice is a no-op.
pub fn init_with_level(level: LevelFilter) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_format = var("RUST_LOG_FORMAT").unwrap_or_default();
    let log_layer = log_layer(&log_format, env_filter, std::io::stderr);

    if tracing_subscriber::registry().with(log_layer).try_init().is_err() {
        warn!("Tracing subscriber already initialized, keeping the existing one");
    }
}

fn log_layer<S, W>(
    format: &str,
    env_filter: EnvFilter,
    writer: W,
) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(env_filter)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(writer)
            .with_filter(env_filter)
            .boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn emit(format: &str) -> String {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry().with(log_layer(
            format,
            EnvFilter::new("info"),
            captured.clone(),
        ));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(monitor = "api", "check recorded");
            tracing::debug!("filtered out");
        });
        captured.text()
    }

    #[test]
    fn test_json_format_uses_given_writer() {
        let output = emit("json");
        assert!(output.contains(r#""message":"check recorded""#), "{output}");
        assert!(output.contains(r#""monitor":"api""#), "{output}");
        assert!(!output.contains("filtered out"));
    }

    #[test]
    fn test_compact_format_uses_given_writer() {
        let output = emit("");
        assert!(output.contains("check recorded"), "{output}");
        assert!(!output.contains("filtered out"));
    }
}
