//! Tracing layer feeding a `Logger`
//!
//! Lets a host keep using `tracing` macros while its events land in the
//! capped store. Events from ignored targets (this crate and `sqlx` by
//! default) are skipped, otherwise the writer's own diagnostics and the
//! store's query logs would be written back into the store.

use crate::severity::Severity;
use crate::writer::Logger;
use tracing::{Event, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

/// Targets skipped unless overridden
pub const DEFAULT_IGNORED_TARGETS: [&str; 2] = [env!("CARGO_CRATE_NAME"), "sqlx"];

pub struct CappedLogLayer {
    logger: Logger,
    ignored_targets: Vec<String>,
}

impl CappedLogLayer {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            ignored_targets: DEFAULT_IGNORED_TARGETS.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Also skip events whose target starts with `prefix`
    pub fn ignore_target(mut self, prefix: impl Into<String>) -> Self {
        self.ignored_targets.push(prefix.into());
        self
    }

    fn is_ignored(&self, target: &str) -> bool {
        self.ignored_targets.iter().any(|prefix| target.starts_with(prefix.as_str()))
    }
}

/// Collects the `message` field and renders the rest as `key=value`
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn into_text(self) -> String {
        let mut text = self.message.unwrap_or_default();
        for (name, value) in self.fields {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&name);
            text.push('=');
            text.push_str(&value);
        }
        text
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let value_str = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(value_str),
            name => self.fields.push((name.to_string(), value_str)),
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            name => self.fields.push((name.to_string(), value.to_string())),
        }
    }
}

impl<S> Layer<S> for CappedLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if self.is_ignored(metadata.target()) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.logger
            .log_event(Severity::from(metadata.level()), &visitor.into_text(), None);
    }
}
