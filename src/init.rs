//! Process-level wiring
//!
//! `create_logger` is what a host calls once at startup. It never fails:
//! when the store is unreachable the host gets the file-only logger, and
//! only when the log file itself cannot be opened does it fall back to a
//! stderr-only logger at WARN, plus a warning explaining why.

use crate::config::{default_sources, Environment};
use crate::layer::CappedLogLayer;
use crate::severity::{LevelGate, Severity};
use crate::sink::FileSink;
use crate::writer::{Logger, LoggerOptions};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Options for a host that keeps its configuration files in `config_dir`
pub fn host_options(env: Environment, config_dir: &Path, log_path: &Path) -> LoggerOptions {
    let auto_flush = !env.is_production();
    LoggerOptions::new(env, log_path)
        .with_sources(default_sources(config_dir))
        .with_auto_flush(auto_flush)
}

/// Build the process-wide logger
pub async fn create_logger(options: LoggerOptions) -> Logger {
    let log_path = options.log_path.clone();
    let application_name = options.fallback_application_name();

    match Logger::connect(options).await {
        Ok(logger) => logger,
        Err(e) => {
            let cause = e.source.to_string();
            match e.into_degraded() {
                Some(logger) => logger,
                None => stderr_logger(application_name, &log_path, &cause),
            }
        }
    }
}

/// Minimal logger used when the real one could not be built
pub fn stderr_logger(application_name: String, log_path: &Path, cause: &str) -> Logger {
    let gate = Arc::new(LevelGate::new(Severity::Warn));
    let logger = Logger::degraded(application_name, FileSink::stderr(gate.clone()), gate);

    logger.log_event(
        Severity::Warn,
        &format!(
            "Capped logger initializer error: unable to access log file. Please ensure that {} exists and is writable. \
             The log level has been raised to WARN and the output directed to STDERR until the problem is fixed.\n{}",
            log_path.display(),
            cause
        ),
        None,
    );

    logger
}

/// Initialize tracing for the crate's own diagnostics
///
/// Note: This function can only be called once per process.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

/// Initialize tracing and route every host event into `logger` as well
pub fn init_tracing_with_logger(logger: Logger) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(CappedLogLayer::new(logger));

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: Failed to install capped log layer: {}", e);
        eprintln!("Events will only be written to the console");
    }
}
