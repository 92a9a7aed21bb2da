//! Error types for the schema synchronization engine.

use crate::driver::DriverError;

/// Errors that can occur while declaring, diffing or synchronizing tables.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The primary key of a table that already exists was changed.
    #[error("Unable to change primary keys of existing table '{table}'")]
    PrimaryKeyChange {
        /// The table whose primary key was changed.
        table: String,
    },

    /// The dialect has no way to alter a column in place.
    #[error("Dialect '{dialect}' does not implement column alteration ({table}.{column})")]
    AlterColumnUnsupported {
        /// Dialect name.
        dialect: &'static str,
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A column type definition string could not be parsed.
    #[error("Invalid column type '{definition}': {reason}")]
    InvalidColumnType {
        /// The definition as given.
        definition: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A declared column never received a type.
    #[error("Column '{table}.{column}' has no type")]
    MissingColumnType {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A DDL statement was rejected by the database.
    #[error("Failed to execute schema statement on '{table}': {source}\n  statement: {statement}")]
    Statement {
        /// Table the statement belongs to.
        table: String,
        /// The SQL that failed.
        statement: String,
        /// The driver error.
        #[source]
        source: DriverError,
    },

    /// Tables reference each other in a cycle.
    #[error("Circular foreign key dependency between tables: {}", .tables.join(" -> "))]
    CircularDependency {
        /// The tables on the cycle, in visiting order.
        tables: Vec<String>,
    },

    /// The schema of a read-only database was asked to change.
    #[error("Database '{0}' is read-only")]
    ReadOnly(String),

    /// A declaration refers to something that does not exist or is inconsistent.
    #[error("Invalid declaration: {0}")]
    InvalidDeclaration(String),

    /// Driver error outside of a specific DDL statement (transactions, reflection).
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// IO error (reading schema files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
