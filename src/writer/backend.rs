//! Writer used while the capped store is reachable

use super::{LogWriter, WriterState};
use crate::capped::CappedCollection;
use crate::config::LoggerConfig;
use crate::error::{LogError, Result};
use crate::record::{CombinedRecord, LogRecord};
use crate::severity::{LevelGate, Severity};
use crate::sink::FileSink;
use crate::unit::Unit;
use async_trait::async_trait;
use std::sync::Arc;

pub struct BackendWriter {
    config: LoggerConfig,
    collection: CappedCollection,
    application_name: String,
    gate: Arc<LevelGate>,
    /// `None` when file logging is disabled
    sink: Option<FileSink>,
}

impl BackendWriter {
    pub fn new(
        config: LoggerConfig,
        collection: CappedCollection,
        application_name: String,
        gate: Arc<LevelGate>,
        sink: Option<FileSink>,
    ) -> Self {
        Self {
            config,
            collection,
            application_name,
            gate,
            sink,
        }
    }

    async fn insert(&self, record: &CombinedRecord) -> Result<(), crate::store::StoreError> {
        self.collection
            .store()
            .insert(self.collection.name(), &record.to_document(), self.config.safe_insert)
            .await
    }
}

#[async_trait]
impl LogWriter for BackendWriter {
    fn state(&self) -> WriterState {
        WriterState::Connected
    }

    fn application_name(&self) -> &str {
        &self.application_name
    }

    fn config(&self) -> Option<&LoggerConfig> {
        Some(&self.config)
    }

    fn accept(
        &self,
        unit: Option<&Unit>,
        severity: Severity,
        message: &str,
        progname: Option<&str>,
    ) -> Option<LogRecord> {
        let progname = progname.unwrap_or(&self.application_name);
        let mut line = None;

        if self.gate.allows(severity) && !message.is_empty() {
            if self.config.combine_request {
                if let Some(unit) = unit {
                    unit.append(severity, message);
                }
            }

            if self.config.individual_lines {
                line = Some(LogRecord::simple(severity, message, progname));
            }
        }

        if let Some(sink) = &self.sink {
            sink.write(severity, message, progname);
        }

        line
    }

    async fn persist_line(&self, record: LogRecord) -> Result<()> {
        self.collection
            .store()
            .insert(self.collection.name(), &record.to_document(), self.config.safe_insert)
            .await
            .map_err(LogError::Persist)
    }

    async fn persist_unit(&self, mut record: CombinedRecord) {
        let first = match self.insert(&record).await {
            Ok(()) => return,
            Err(e) => e,
        };

        tracing::warn!(
            collection = %self.collection.name(),
            error = %first,
            "Combined record rejected, retrying with flattened metadata"
        );

        record.force_serialize();

        if let Err(e) = self.insert(&record).await {
            tracing::error!(
                collection = %self.collection.name(),
                error = %e,
                message_count = record.messages().values().map(Vec::len).sum::<usize>(),
                "Dropping combined record after retry failed"
            );
        }
    }

    async fn reset(&self) -> Result<()> {
        self.collection
            .reset()
            .await
            .map_err(LogError::BackendUnavailable)
    }

    fn flush(&self) {
        if let Some(sink) = &self.sink {
            sink.flush();
        }
    }
}
