mod logging;

pub use logging::{FileLogLayer, FileLogSink};

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default stdout filter directive. Overridden by `RUST_LOG`.
    pub log_level: String,
    /// Emit stdout logs as JSON lines instead of human-readable text.
    pub json: bool,
    /// Log file; `None` disables the file layer.
    pub log_file: Option<PathBuf>,
    pub file_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            log_file: Some(PathBuf::from("agent_logs/dynamate.log")),
            file_level: Level::DEBUG,
        }
    }
}

impl TelemetryConfig {
    /// Parse a level name, falling back to `default` when unrecognized.
    pub fn parse_level(raw: &str, default: Level) -> Level {
        Level::from_str(raw).unwrap_or(default)
    }
}

/// Guard that flushes the log file on drop.
pub struct TelemetryGuard {
    file_sink: Option<Arc<FileLogSink>>,
}

impl TelemetryGuard {
    pub fn file_logging(&self) -> bool {
        self.file_sink.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(sink) = &self.file_sink {
            sink.flush();
        }
    }
}

/// Initialize the telemetry subsystem. Call once at startup; later calls leave the
/// first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let stdout_layer: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_filter(env_filter)
            .boxed()
    };

    let (file_layer, file_sink) = match &config.log_file {
        Some(path) => match FileLogSink::new(path) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                (Some(FileLogLayer::new(sink.clone(), config.file_level)), Some(sink))
            }
            Err(e) => {
                eprintln!("dynamate-telemetry: failed to open log file {}: {e}", path.display());
                (None, None)
            }
        },
        None => (None, None),
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("dynamate-telemetry: subscriber already set: {e}");
    }

    TelemetryGuard { file_sink }
}
