//! Writer used in degraded mode: everything goes to the fallback sink

use super::{LogWriter, WriterState};
use crate::config::LoggerConfig;
use crate::error::{LogError, Result};
use crate::record::{CombinedRecord, LogRecord};
use crate::severity::Severity;
use crate::sink::FileSink;
use crate::unit::Unit;
use async_trait::async_trait;

pub struct FileWriter {
    application_name: String,
    sink: FileSink,
}

impl FileWriter {
    pub fn new(application_name: String, sink: FileSink) -> Self {
        Self {
            application_name,
            sink,
        }
    }
}

#[async_trait]
impl LogWriter for FileWriter {
    fn state(&self) -> WriterState {
        WriterState::Degraded
    }

    fn application_name(&self) -> &str {
        &self.application_name
    }

    fn config(&self) -> Option<&LoggerConfig> {
        None
    }

    fn accept(
        &self,
        _unit: Option<&Unit>,
        severity: Severity,
        message: &str,
        progname: Option<&str>,
    ) -> Option<LogRecord> {
        self.sink
            .write(severity, message, progname.unwrap_or(&self.application_name));
        None
    }

    async fn persist_line(&self, _record: LogRecord) -> Result<()> {
        Ok(())
    }

    async fn persist_unit(&self, record: CombinedRecord) {
        tracing::trace!(
            runtime_ms = record.runtime(),
            "Degraded writer discards combined record"
        );
    }

    async fn reset(&self) -> Result<()> {
        Err(LogError::Degraded)
    }

    fn flush(&self) {
        self.sink.flush();
    }
}
