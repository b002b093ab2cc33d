//! Request-scoped log writer
//!
//! A `Logger` is built once per process (or per test) and handed to whatever
//! needs to log. Construction resolves configuration and makes sure the
//! capped collection exists; the outcome selects one of two writers:
//!
//! ```text
//! CONNECTING ──ok──▶ CONNECTED  (BackendWriter: store + optional file sink)
//!      │
//!      └──error──▶ DEGRADED     (FileWriter: file sink only)
//! ```
//!
//! There is no reconnection: the selected writer is kept for the lifetime of
//! the `Logger`.

mod backend;
mod file;

pub use backend::BackendWriter;
pub use file::FileWriter;

use crate::capped::CappedCollection;
use crate::config::{
    application_name_from_path, resolve_config, ConfigSource, Environment, LoggerConfig,
};
use crate::error::{LogError, Result};
use crate::record::{CombinedRecord, LogRecord, Metadata};
use crate::severity::{LevelGate, Severity};
use crate::sink::FileSink;
use crate::store::{LogStore, SqliteStore, StoreError};
use crate::unit::{runtime_millis, Unit};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Connection state of a writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Uninitialized,
    Connecting,
    Connected,
    Degraded,
}

/// One way of writing log messages, chosen at construction
#[async_trait]
pub trait LogWriter: Send + Sync {
    fn state(&self) -> WriterState;

    fn application_name(&self) -> &str;

    /// Effective configuration, `None` when it was never resolved
    fn config(&self) -> Option<&LoggerConfig>;

    /// Synchronous part of a write: severity gate, combined record, fallback sink
    ///
    /// Returns the standalone record to persist when individual lines are on.
    fn accept(
        &self,
        unit: Option<&Unit>,
        severity: Severity,
        message: &str,
        progname: Option<&str>,
    ) -> Option<LogRecord>;

    async fn persist_line(&self, record: LogRecord) -> Result<()>;

    /// Persist a finished unit of work; failures are absorbed
    async fn persist_unit(&self, record: CombinedRecord);

    /// Drop and recreate the capped collection
    async fn reset(&self) -> Result<()>;

    fn flush(&self);
}

/// Construction parameters supplied by the host
pub struct LoggerOptions {
    pub environment: Environment,
    /// Candidate configuration sources, first existing one wins
    pub sources: Vec<Box<dyn ConfigSource>>,
    /// Fallback log file
    pub log_path: PathBuf,
    /// Initial severity gate; the configured `level` applies when `None`
    pub level: Option<Severity>,
    /// Used when the configuration has no `application_name`
    pub application_name: Option<String>,
    /// Flush the fallback sink after every line
    pub auto_flush: bool,
}

impl LoggerOptions {
    pub fn new(environment: Environment, log_path: impl Into<PathBuf>) -> Self {
        Self {
            environment,
            sources: Vec::new(),
            log_path: log_path.into(),
            level: None,
            application_name: None,
            auto_flush: true,
        }
    }

    pub fn with_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn with_sources(mut self, sources: Vec<Box<dyn ConfigSource>>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn with_level(mut self, level: Severity) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    pub fn with_auto_flush(mut self, auto_flush: bool) -> Self {
        self.auto_flush = auto_flush;
        self
    }

    /// Name used when configuration does not set one
    pub(crate) fn fallback_application_name(&self) -> String {
        self.application_name
            .clone()
            .or_else(|| {
                std::env::current_dir()
                    .ok()
                    .and_then(|dir| application_name_from_path(&dir))
            })
            .unwrap_or_else(|| "app".to_string())
    }
}

/// Construction failed; the writer may still be usable in degraded mode
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ConnectError {
    #[source]
    pub source: LogError,
    degraded: Option<Logger>,
}

impl ConnectError {
    /// File-only logger, present when the fallback sink could be opened
    pub fn degraded(&self) -> Option<&Logger> {
        self.degraded.as_ref()
    }

    pub fn into_degraded(self) -> Option<Logger> {
        self.degraded
    }
}

/// Handle to the writer selected at construction
#[derive(Clone)]
pub struct Logger {
    inner: Arc<dyn LogWriter>,
    gate: Arc<LevelGate>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("state", &self.state())
            .field("application_name", &self.application_name())
            .field("level", &self.level())
            .finish()
    }
}

impl Logger {
    /// Resolve configuration, open the SQLite store it names and ensure the
    /// capped collection exists
    pub async fn connect(options: LoggerOptions) -> Result<Self, ConnectError> {
        Self::connect_inner(options, |config: &LoggerConfig| {
            let url = config.database_url.clone();
            async move {
                let store = SqliteStore::new(&url).await?;
                Ok::<_, StoreError>(Arc::new(store) as Arc<dyn LogStore>)
            }
        })
        .await
    }

    /// Same as `connect`, against an already opened store
    pub async fn connect_with_store(
        options: LoggerOptions,
        store: Arc<dyn LogStore>,
    ) -> Result<Self, ConnectError> {
        Self::connect_inner(options, move |_: &LoggerConfig| async move { Ok::<_, StoreError>(store) })
            .await
    }

    /// File-only logger on the given sink
    pub fn degraded(application_name: impl Into<String>, sink: FileSink, gate: Arc<LevelGate>) -> Self {
        Self {
            inner: Arc::new(FileWriter::new(application_name.into(), sink)),
            gate,
        }
    }

    /// Wrap a custom writer
    pub fn from_writer(inner: Arc<dyn LogWriter>, gate: Arc<LevelGate>) -> Self {
        Self { inner, gate }
    }

    async fn connect_inner<F, Fut>(options: LoggerOptions, open_store: F) -> Result<Self, ConnectError>
    where
        F: FnOnce(&LoggerConfig) -> Fut,
        Fut: Future<Output = Result<Arc<dyn LogStore>, StoreError>>,
    {
        let gate = Arc::new(LevelGate::new(options.level.unwrap_or_default()));

        tracing::debug!(
            state = ?WriterState::Connecting,
            env = %options.environment,
            "Connecting capped logger"
        );

        match Self::establish(&options, open_store).await {
            Ok((config, collection)) => {
                if options.level.is_none() {
                    gate.set(config.level);
                }

                let sink = if config.disable_file_logging {
                    None
                } else {
                    match FileSink::open(&options.log_path, gate.clone(), options.auto_flush) {
                        Ok(sink) => Some(sink),
                        Err(e) => {
                            return Err(ConnectError {
                                source: LogError::Io(e),
                                degraded: None,
                            })
                        }
                    }
                };

                let application_name = config
                    .application_name
                    .clone()
                    .unwrap_or_else(|| options.fallback_application_name());

                tracing::info!(
                    collection = %collection.name(),
                    application = %application_name,
                    file_logging = sink.is_some(),
                    "Capped logger connected"
                );

                Ok(Self {
                    inner: Arc::new(BackendWriter::new(config, collection, application_name, gate.clone(), sink)),
                    gate,
                })
            }
            Err(cause) => {
                tracing::warn!(
                    error = %cause,
                    kind = cause.kind(),
                    log_path = %options.log_path.display(),
                    "Using file logger due to error"
                );

                let degraded = match FileSink::open(&options.log_path, gate.clone(), options.auto_flush) {
                    Ok(sink) => {
                        let logger = Self::degraded(options.fallback_application_name(), sink, gate);
                        logger.log_event(Severity::Error, &cause.to_string(), None);
                        Some(logger)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Fallback log file unavailable");
                        None
                    }
                };

                Err(ConnectError {
                    source: cause,
                    degraded,
                })
            }
        }
    }

    async fn establish<F, Fut>(options: &LoggerOptions, open_store: F) -> Result<(LoggerConfig, CappedCollection)>
    where
        F: FnOnce(&LoggerConfig) -> Fut,
        Fut: Future<Output = Result<Arc<dyn LogStore>, StoreError>>,
    {
        let resolved = resolve_config(&options.sources, &options.environment)?;
        let config = LoggerConfig::effective(&options.environment, resolved)?;

        let store = open_store(&config).await.map_err(LogError::BackendUnavailable)?;
        let collection = CappedCollection::from_config(store, &config);
        collection.ensure_exists().await.map_err(LogError::BackendUnavailable)?;

        Ok((config, collection))
    }

    pub fn state(&self) -> WriterState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == WriterState::Connected
    }

    pub fn application_name(&self) -> &str {
        self.inner.application_name()
    }

    pub fn config(&self) -> Option<&LoggerConfig> {
        self.inner.config()
    }

    pub fn level(&self) -> Severity {
        self.gate.get()
    }

    pub fn set_level(&self, level: Severity) {
        self.gate.set(level);
    }

    /// Log one message; returns `message` whatever the outcome
    ///
    /// Inside a unit of work the message is appended to that unit's combined
    /// record. Individual-line write errors are logged, not returned.
    pub async fn add<'a>(&self, severity: Severity, message: &'a str, progname: Option<&str>) -> &'a str {
        if let Err(e) = self.try_add(severity, message, progname).await {
            tracing::error!(error = %e, severity = %severity, "Failed to persist log line");
        }
        message
    }

    /// Like `add`, but surfaces the individual-line write error
    pub async fn try_add(&self, severity: Severity, message: &str, progname: Option<&str>) -> Result<()> {
        let unit = Unit::current();
        self.write(unit.as_ref(), severity, message, progname).await
    }

    async fn write(&self, unit: Option<&Unit>, severity: Severity, message: &str, progname: Option<&str>) -> Result<()> {
        match self.inner.accept(unit, severity, message, progname) {
            Some(line) => self.inner.persist_line(line).await,
            None => Ok(()),
        }
    }

    /// Synchronous entry point for callers outside async code
    ///
    /// The individual-line write, if any, is spawned on the current tokio
    /// runtime.
    pub fn log_event(&self, severity: Severity, message: &str, progname: Option<&str>) {
        let unit = Unit::current();
        let Some(line) = self.inner.accept(unit.as_ref(), severity, message, progname) else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = self.inner.clone();
                handle.spawn(async move {
                    if let Err(e) = inner.persist_line(line).await {
                        tracing::error!(error = %e, "Failed to persist log line");
                    }
                });
            }
            Err(_) => {
                tracing::warn!("No tokio runtime, individual log line not persisted");
            }
        }
    }

    pub async fn debug<'a>(&self, message: &'a str) -> &'a str {
        self.add(Severity::Debug, message, None).await
    }

    pub async fn info<'a>(&self, message: &'a str) -> &'a str {
        self.add(Severity::Info, message, None).await
    }

    pub async fn warn<'a>(&self, message: &'a str) -> &'a str {
        self.add(Severity::Warn, message, None).await
    }

    pub async fn error<'a>(&self, message: &'a str) -> &'a str {
        self.add(Severity::Error, message, None).await
    }

    pub async fn fatal<'a>(&self, message: &'a str) -> &'a str {
        self.add(Severity::Fatal, message, None).await
    }

    /// Open a unit of work tagged with `metadata`
    ///
    /// Fails with `LogError::ReservedKey` before anything is created when
    /// metadata uses a writer-owned key.
    pub fn begin_unit(&self, metadata: Metadata) -> Result<Unit> {
        let record = CombinedRecord::new(self.application_name(), metadata)?;
        Ok(Unit::new(record))
    }

    /// Close a unit of work and persist its record
    ///
    /// The runtime defaults to the time since `begin_unit`.
    pub async fn finish(&self, unit: Unit) {
        unit.set_runtime_if_unset(runtime_millis(unit.elapsed()));
        self.inner.persist_unit(unit.into_record()).await;
    }

    /// Run `body` as one unit of work
    ///
    /// Every message logged while `body` runs lands in one combined record,
    /// persisted when `body` completes together with its runtime. An error
    /// (or panic) from `body` is recorded at ERROR severity, the record is
    /// persisted, then the error is returned (or the panic resumed).
    pub async fn run<F, T, E>(&self, metadata: Metadata, body: F) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display + From<LogError>,
    {
        let unit = self.begin_unit(metadata)?;

        let started = Instant::now();
        let outcome = AssertUnwindSafe(unit.scope(body)).catch_unwind().await;
        unit.set_runtime(runtime_millis(started.elapsed()));

        let failure = match &outcome {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!("panic: {}", panic_message(panic.as_ref()))),
        };

        if let Some(text) = failure {
            if let Err(e) = self.write(Some(&unit), Severity::Error, &text, None).await {
                tracing::error!(error = %e, "Failed to persist log line");
            }
        }

        self.finish(unit).await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Drop the capped collection and recreate it empty
    pub async fn reset(&self) -> Result<()> {
        self.inner.reset().await
    }

    pub fn flush(&self) {
        self.inner.flush();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
