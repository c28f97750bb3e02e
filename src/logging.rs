use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::error::{ValidatorError, ValidatorResult};

/// Logging configuration for the validator
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: PathBuf,
    pub enable_file_logging: bool,
    pub enable_json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            enable_file_logging: false,
            enable_json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub fn default_directive(&self) -> String {
        format!("po_validator={},po_validate={},warn", self.level, self.level)
    }
}

fn console_layer<S>() -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .boxed()
}

/// Initialize the logging system.
///
/// Returns the file appender's guard when file logging is enabled; keep it
/// alive for the lifetime of the process so buffered lines get flushed.
pub fn init_logging(config: &LoggingConfig) -> ValidatorResult<Option<WorkerGuard>> {
    if config.enable_file_logging {
        fs::create_dir_all(&config.log_dir)
            .map_err(|e| ValidatorError::file_io(config.log_dir.to_string_lossy().to_string(), e))?;
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let registry = Registry::default().with(env_filter);


    let guard = if config.enable_file_logging {
        let file_appender = rolling::daily(&config.log_dir, "po-validator.log");
        let (file_writer, guard) = non_blocking(file_appender);

        let file_layer = if config.enable_json_format {
            fmt::layer().json().with_writer(file_writer).boxed()
        } else {
            fmt::layer().with_writer(file_writer).with_ansi(false).boxed()
        };

        registry
            .with(file_layer)
            .with(console_layer())
            .try_init()
            .map_err(|e| ValidatorError::configuration(format!("logging already initialized: {}", e)))?;
        Some(guard)
    } else {
        registry
            .with(console_layer())
            .try_init()
            .map_err(|e| ValidatorError::configuration(format!("logging already initialized: {}", e)))?;
        None
    };

    info!("📋 PO validator logging initialized");
    info!("Log level: {}", config.level);

    if config.enable_file_logging {
        info!("File logging enabled: {}", config.log_dir.display());
    }

    Ok(guard)
}

/// Performance logging utilities
pub struct PerformanceTimer {
    start: std::time::Instant,
    operation: String,
}

impl PerformanceTimer {
    pub fn start(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        tracing::debug!("⏱️  Starting: {}", operation);
        Self {
            start: std::time::Instant::now(),
            operation,
        }
    }

    /// Log the time since start under `checkpoint` and return it in ms.
    pub fn checkpoint(&self, checkpoint: &str) -> u128 {
        let elapsed = self.start.elapsed().as_millis();
        tracing::debug!("⏱️  {} - {}: {}ms", self.operation, checkpoint, elapsed);
        elapsed
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        info!("⏱️  Completed {}: {}ms", self.operation, elapsed.as_millis());
    }
}

/// Macro for logging with context
#[macro_export]
macro_rules! log_error {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            recoverable = $error.is_recoverable(),
            "PO validator error occurred"
        );
    };
}

#[macro_export]
macro_rules! log_processing_start {
    ($file:expr, $size:expr) => {
        tracing::info!(
            file = %$file,
            size_bytes = $size,
            "📄 Starting PO validation"
        );
    };
}
