//! Connection primitive.
//!
//! The engine talks to databases only through the [`Connection`] trait:
//! statement execution, row queries and (nested) transactions. Two
//! implementations ship with the crate:
//!
//! - [`SqliteConnection`] over an `sqlx` SQLite pool.
//! - [`RecordingConnection`], which executes nothing and records every
//!   statement. It backs dry-run planning and statement-order tests.

mod recording;
mod sqlite;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

pub use recording::{RecordedEvent, RecordingConnection};
pub use sqlite::SqliteConnection;

/// A single value bound to or read from a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Real(f64),
    /// Text value.
    Text(String),
    /// Binary value.
    Blob(Vec<u8>),
}

impl Value {
    /// Whether this is SQL NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer content, if any.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Text content, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// A result row, column name to value, in select order.
pub type Row = IndexMap<String, Value>;

/// Errors raised by a connection.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Error from the underlying sqlx driver.
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The connection refused the statement.
    #[error("Statement rejected: {0}")]
    Rejected(String),

    /// Commit or rollback without an open transaction.
    #[error("No transaction is open")]
    NoTransaction,
}

/// Result type for connection operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// A database connection able to run DDL inside transactions.
///
/// `begin` may be called while a transaction is already open; implementations
/// then open a nested level (a savepoint) and the matching `commit` or
/// `rollback` only closes that level.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Executes a statement and returns the number of affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> DriverResult<u64>;

    /// Runs a query and returns every row.
    async fn query(&self, sql: &str, params: &[Value]) -> DriverResult<Vec<Row>>;

    /// Opens a transaction level.
    async fn begin(&self) -> DriverResult<()>;

    /// Commits the innermost transaction level.
    async fn commit(&self) -> DriverResult<()>;

    /// Rolls back the innermost transaction level.
    async fn rollback(&self) -> DriverResult<()>;

    /// Number of open transaction levels.
    fn transaction_level(&self) -> usize;

    /// Quotes an identifier for this connection.
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Whether two handles point at the same connection.
#[must_use]
pub fn same_connection(a: &Arc<dyn Connection>, b: &Arc<dyn Connection>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}
