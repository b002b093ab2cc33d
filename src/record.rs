//! Persisted log record shapes
//!
//! A record is either *simple* (`message` + `severity`) or *combined*
//! (`messages` keyed by severity name, plus `runtime`), never both:
//!
//! ```text
//! simple:   {time, progname, message, severity}
//! combined: {time, progname, messages: {SEVERITY: [text, ...]}, runtime?, <metadata>...}
//! ```

use crate::error::{LogError, Result};
use crate::severity::Severity;
use crate::store::StoreError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::ops::Index;

/// Metadata keys owned by the writer
pub const RESERVED_KEYS: [&str; 5] = ["messages", "request_time", "ip", "runtime", "application_name"];

/// Fields every stored document carries; metadata may not shadow them
pub const RECORD_FIELDS: [&str; 4] = ["time", "progname", "message", "severity"];

/// Extra top-level fields attached to a combined record
pub type Metadata = Map<String, Value>;

/// Messages of a unit of work keyed by severity name
///
/// Keys keep the order in which each severity first appeared, texts keep
/// their append order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Messages {
    entries: Vec<(String, Vec<String>)>,
}

impl Messages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, text: impl Into<String>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, texts)) => texts.push(text.into()),
            None => self.entries.push((key, vec![text.into()])),
        }
    }

    /// Replace the texts stored under `key`
    pub fn insert(&mut self, key: impl Into<String>, texts: Vec<String>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = texts,
            None => self.entries.push((key, texts)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Vec<String>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Vec<String>> {
        self.entries.iter().map(|(_, v)| v)
    }
}

impl Index<&str> for Messages {
    type Output = Vec<String>;

    fn index(&self, key: &str) -> &Self::Output {
        match self.get(key) {
            Some(texts) => texts,
            None => panic!("no messages logged at {}", key),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    Simple { message: String, severity: Severity },
    Combined { messages: Messages, runtime: Option<u64> },
}

/// One stored log document
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub time: DateTime<Utc>,
    pub progname: String,
    pub body: RecordBody,
    pub extra: Map<String, Value>,
}

impl LogRecord {
    pub fn simple(severity: Severity, message: impl Into<String>, progname: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            progname: progname.into(),
            body: RecordBody::Simple {
                message: message.into(),
                severity,
            },
            extra: Map::new(),
        }
    }

    pub fn is_combined(&self) -> bool {
        matches!(self.body, RecordBody::Combined { .. })
    }

    /// Document written to the store
    pub fn to_document(&self) -> Value {
        let mut doc = self.extra.clone();

        doc.insert("time".to_string(), Value::from(format_time(&self.time)));
        doc.insert("progname".to_string(), Value::from(self.progname.clone()));

        match &self.body {
            RecordBody::Simple { message, severity } => {
                doc.insert("message".to_string(), Value::from(message.clone()));
                doc.insert("severity".to_string(), Value::from(severity.as_str()));
            }
            RecordBody::Combined { messages, runtime } => {
                let messages: Map<String, Value> = messages
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                    .collect();
                doc.insert("messages".to_string(), Value::Object(messages));
                if let Some(runtime) = runtime {
                    doc.insert("runtime".to_string(), Value::from(*runtime));
                }
            }
        }

        Value::Object(doc)
    }

    /// Parse a stored document back into a record
    pub fn from_document(document: &Value) -> std::result::Result<Self, StoreError> {
        let invalid = |what: &str| StoreError::InvalidDocument(what.to_string());

        let mut doc = document
            .as_object()
            .cloned()
            .ok_or_else(|| invalid("record must be an object"))?;

        let time = doc
            .remove("time")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| invalid("missing time"))?;
        let time = DateTime::parse_from_rfc3339(&time)
            .map_err(|e| StoreError::InvalidDocument(format!("bad time '{}': {}", time, e)))?
            .with_timezone(&Utc);

        let progname = match doc.remove("progname") {
            Some(Value::String(p)) => p,
            _ => String::new(),
        };

        let message = doc.remove("message");
        let severity = doc.remove("severity");
        let messages = doc.remove("messages");

        let body = match (message, severity, messages) {
            (Some(Value::String(message)), Some(Value::String(severity)), None) => RecordBody::Simple {
                message,
                severity: severity.parse().map_err(|e: String| invalid(&e))?,
            },
            (None, None, Some(Value::Object(map))) => {
                let mut messages = Messages::new();
                for (key, list) in map {
                    let texts = list
                        .as_array()
                        .ok_or_else(|| invalid("messages entries must be lists"))?
                        .iter()
                        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                        .collect();
                    messages.insert(key, texts);
                }
                let runtime = doc.remove("runtime").and_then(|v| v.as_u64());
                RecordBody::Combined { messages, runtime }
            }
            _ => return Err(invalid("record must be either simple or combined")),
        };

        Ok(Self {
            time,
            progname,
            body,
            extra: doc,
        })
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Reject metadata that uses a writer-owned key or a record field
pub fn check_metadata(metadata: &Metadata) -> Result<()> {
    let owned = |k: &&String| RESERVED_KEYS.contains(&k.as_str()) || RECORD_FIELDS.contains(&k.as_str());
    match metadata.keys().find(owned) {
        Some(key) => Err(LogError::ReservedKey(key.clone())),
        None => Ok(()),
    }
}

/// Working state of an open unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedRecord {
    time: DateTime<Utc>,
    progname: String,
    messages: Messages,
    metadata: Metadata,
    runtime: Option<u64>,
}

impl CombinedRecord {
    pub fn new(progname: impl Into<String>, metadata: Metadata) -> Result<Self> {
        check_metadata(&metadata)?;

        Ok(Self {
            time: Utc::now(),
            progname: progname.into(),
            messages: Messages::new(),
            metadata,
            runtime: None,
        })
    }

    pub fn append(&mut self, severity: Severity, message: impl Into<String>) {
        self.messages.push(severity.as_str(), message);
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn runtime(&self) -> Option<u64> {
        self.runtime
    }

    pub fn set_runtime(&mut self, millis: u64) {
        self.runtime = Some(millis);
    }

    /// Replace nested metadata values with their text form
    ///
    /// Every entry of an object- or array-valued metadata field becomes a
    /// string, which removes field names and depth a store may reject.
    /// Message texts are already strings.
    pub fn force_serialize(&mut self) {
        for value in self.metadata.values_mut() {
            match value {
                Value::Object(map) => {
                    for entry in map.values_mut() {
                        *entry = Value::String(text_of(entry));
                    }
                }
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        *item = Value::String(text_of(item));
                    }
                }
                _ => {}
            }
        }
    }

    pub fn to_record(&self) -> LogRecord {
        LogRecord {
            time: self.time,
            progname: self.progname.clone(),
            body: RecordBody::Combined {
                messages: self.messages.clone(),
                runtime: self.runtime,
            },
            extra: self.metadata.clone(),
        }
    }

    pub fn to_document(&self) -> Value {
        self.to_record().to_document()
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
