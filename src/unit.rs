//! Unit-of-work handles
//!
//! Each unit of work owns its `CombinedRecord`. While a unit's future runs
//! inside `Unit::scope`, the handle is reachable through a task-local, so
//! `Logger::add` appends to the right record even when many units run
//! concurrently on one logger. Tasks spawned from inside the scope do not
//! inherit it.

use crate::record::CombinedRecord;
use crate::severity::Severity;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

tokio::task_local! {
    static CURRENT_UNIT: Unit;
}

/// Shared handle to one open combined record
#[derive(Debug, Clone)]
pub struct Unit {
    record: Arc<Mutex<CombinedRecord>>,
    started: Instant,
}

impl Unit {
    pub(crate) fn new(record: CombinedRecord) -> Self {
        Self {
            record: Arc::new(Mutex::new(record)),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CombinedRecord> {
        // A panic while appending leaves the record usable
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The unit of work the current task is running, if any
    pub fn current() -> Option<Unit> {
        CURRENT_UNIT.try_with(Unit::clone).ok()
    }

    /// Run `fut` with this unit as the current one
    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        CURRENT_UNIT.scope(self.clone(), fut).await
    }

    pub(crate) fn append(&self, severity: Severity, message: &str) {
        self.lock().append(severity, message);
    }

    pub(crate) fn set_runtime_if_unset(&self, millis: u64) {
        let mut record = self.lock();
        if record.runtime().is_none() {
            record.set_runtime(millis);
        }
    }

    pub(crate) fn set_runtime(&self, millis: u64) {
        self.lock().set_runtime(millis);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Copy of the record as it stands
    pub fn snapshot(&self) -> CombinedRecord {
        self.lock().clone()
    }

    pub(crate) fn into_record(self) -> CombinedRecord {
        match Arc::try_unwrap(self.record) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()),
            Err(shared) => shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone(),
        }
    }
}

/// Milliseconds, rounded up
pub fn runtime_millis(elapsed: Duration) -> u64 {
    elapsed.as_nanos().div_ceil(1_000_000) as u64
}
