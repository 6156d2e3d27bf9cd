use std::io;
use std::sync::Once;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable switching log output to JSON lines.
const LOG_FORMAT_ENV_NAME: &str = "LOG_FORMAT";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to bridge `log` records into tracing: {0}")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),

    #[error("failed to install the global tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Flushes buffered log lines when dropped.
///
/// Keep it alive until the process exits, otherwise trailing log lines are lost.
#[must_use = "dropping the flusher stops the background log writer"]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Installs the global subscriber for `app_name`.
///
/// Log lines are written to stdout through a background writer. The filter comes from
/// `RUST_LOG` and defaults to `info` for the application and its adapter crate. Setting
/// `LOG_FORMAT=json` emits one JSON object per line.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    tracing_log::LogTracer::init()?;

    let (writer, guard) = tracing_appender::non_blocking(io::stdout());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{app_name}=info,adapter=info")));
    let json = std::env::var(LOG_FORMAT_ENV_NAME).is_ok_and(|format| format == "json");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(writer))
            .try_init()?;
    }

    Ok(LogFlusher { _guard: guard })
}

static INIT_TEST_TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per test binary.
///
/// Output is captured by the test harness and only shown for failing tests. Set `RUST_LOG` to
/// change verbosity.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
