//! Recording connection.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{Connection, DriverError, DriverResult, Row, Value};

/// Something that happened on a [`RecordingConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    /// A transaction level was opened.
    Begin,
    /// A transaction level was committed.
    Commit,
    /// A transaction level was rolled back.
    Rollback,
    /// A statement was executed.
    Statement(String),
}

#[derive(Debug, Default)]
struct Log {
    events: Vec<RecordedEvent>,
    fail_on: Vec<String>,
    fail_commit: bool,
}

/// Connection that executes nothing and records every call.
///
/// Queries return no rows. A statement containing a substring registered
/// with [`fail_on`](Self::fail_on) is rejected (and still recorded).
/// After [`fail_commit`](Self::fail_commit) every commit closes its level
/// and then fails.
#[derive(Debug)]
pub struct RecordingConnection {
    name: String,
    level: AtomicUsize,
    log: Mutex<Log>,
}

impl RecordingConnection {
    /// Creates a new recording connection.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: AtomicUsize::new(0),
            log: Mutex::new(Log::default()),
        }
    }

    /// Rejects every statement containing `pattern`.
    #[must_use]
    pub fn fail_on(self, pattern: impl Into<String>) -> Self {
        self.with_log(|log| log.fail_on.push(pattern.into()));
        self
    }

    /// Makes every commit fail.
    #[must_use]
    pub fn fail_commit(self) -> Self {
        self.with_log(|log| log.fail_commit = true);
        self
    }

    /// Every recorded event, in order.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.with_log(|log| log.events.clone())
    }

    /// Recorded statements only, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.with_log(|log| {
            log.events
                .iter()
                .filter_map(|e| match e {
                    RecordedEvent::Statement(sql) => Some(sql.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.with_log(|log| log.events.clear());
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut Log) -> T) -> T {
        let mut log = self
            .log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut log)
    }

    fn record(&self, event: RecordedEvent) {
        self.with_log(|log| log.events.push(event));
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> DriverResult<u64> {
        let rejected = self.with_log(|log| {
            log.events.push(RecordedEvent::Statement(sql.to_string()));
            log.fail_on.iter().any(|p| sql.contains(p.as_str()))
        });
        if rejected {
            return Err(DriverError::Rejected(sql.to_string()));
        }
        Ok(0)
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> DriverResult<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn begin(&self) -> DriverResult<()> {
        self.level.fetch_add(1, Ordering::SeqCst);
        self.record(RecordedEvent::Begin);
        Ok(())
    }

    async fn commit(&self) -> DriverResult<()> {
        self.close_level()?;
        let rejected = self.with_log(|log| {
            log.events.push(RecordedEvent::Commit);
            log.fail_commit
        });
        if rejected {
            return Err(DriverError::Rejected("COMMIT".to_string()));
        }
        Ok(())
    }

    async fn rollback(&self) -> DriverResult<()> {
        self.close_level()?;
        self.record(RecordedEvent::Rollback);
        Ok(())
    }

    fn transaction_level(&self) -> usize {
        self.level.load(Ordering::SeqCst)
    }
}

impl RecordingConnection {
    fn close_level(&self) -> DriverResult<()> {
        self.level
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |l| l.checked_sub(1))
            .map(|_| ())
            .map_err(|_| DriverError::NoTransaction)
    }
}
