//! Fallback sink: plain leveled text log
//!
//! Used alongside the backend (unless `disable_file_logging` is set) and as
//! the only destination in degraded mode. One line per message:
//!
//! ```text
//! 2024-05-01T10:00:00.000Z INFO shop: Completed 200 OK
//! ```

use crate::severity::{LevelGate, Severity};
use chrono::{SecondsFormat, Utc};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Buffered lines are flushed after this many writes
pub const FLUSH_EVERY: usize = 64;

struct Output {
    writer: Box<dyn Write + Send>,
    pending: usize,
}

/// Append-only text log with a minimum severity
pub struct FileSink {
    output: Mutex<Output>,
    gate: Arc<LevelGate>,
    auto_flush: bool,
    path: Option<PathBuf>,
}

impl FileSink {
    /// Open (creating if needed) the log file at `path`
    ///
    /// With `auto_flush == false` lines are buffered and flushed every
    /// `FLUSH_EVERY` writes, on `flush()` and on drop.
    pub fn open(path: &Path, gate: Arc<LevelGate>, auto_flush: bool) -> io::Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("not a file path: {}", path.display())))?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name)
            .build(dir)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("{}: {}", path.display(), e)))?;

        let writer: Box<dyn Write + Send> = if auto_flush {
            Box::new(appender)
        } else {
            Box::new(BufWriter::new(appender))
        };

        Ok(Self {
            output: Mutex::new(Output { writer, pending: 0 }),
            gate,
            auto_flush,
            path: Some(path.to_path_buf()),
        })
    }

    /// Unbuffered sink on stderr
    pub fn stderr(gate: Arc<LevelGate>) -> Self {
        Self {
            output: Mutex::new(Output {
                writer: Box::new(io::stderr()),
                pending: 0,
            }),
            gate,
            auto_flush: true,
            path: None,
        }
    }

    /// Path of the log file, `None` for stderr
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn level(&self) -> Severity {
        self.gate.get()
    }

    pub fn set_level(&self, level: Severity) {
        self.gate.set(level);
    }

    /// Append one line if `severity` passes the gate
    pub fn write(&self, severity: Severity, message: &str, progname: &str) {
        if !self.gate.allows(severity) {
            return;
        }

        let line = format_line(severity, message, progname);

        let Ok(mut output) = self.output.lock() else {
            eprintln!("{}", line.trim_end());
            return;
        };

        if let Err(e) = output.writer.write_all(line.as_bytes()) {
            eprintln!("Warning: failed to write log line: {}", e);
            return;
        }

        output.pending += 1;
        if self.auto_flush || output.pending >= FLUSH_EVERY {
            if let Err(e) = output.writer.flush() {
                eprintln!("Warning: failed to flush log file: {}", e);
            }
            output.pending = 0;
        }
    }

    pub fn flush(&self) {
        if let Ok(mut output) = self.output.lock() {
            if let Err(e) = output.writer.flush() {
                eprintln!("Warning: failed to flush log file: {}", e);
            }
            output.pending = 0;
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        self.flush();
    }
}

fn format_line(severity: Severity, message: &str, progname: &str) -> String {
    format!(
        "{} {} {}: {}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        severity,
        progname,
        message
    )
}
