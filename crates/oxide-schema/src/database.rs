//! Database handle.

use std::sync::Arc;

use tracing::debug;

use crate::bus::Bus;
use crate::dialect::{Dialect, SqliteDialect};
use crate::driver::{Connection, SqliteConnection};
use crate::error::{Result, SchemaError};
use crate::reflect::{SchemaReflector, SqliteReflector};
use crate::table::{DropUndeclared, Table};

/// A connection together with the dialect and reflector that go with it.
///
/// Every table handed out shares the same connection. Table names are given
/// without the prefix, which is added on the database side.
#[derive(Debug, Clone)]
pub struct Database {
    name: String,
    prefix: String,
    read_only: bool,
    connection: Arc<dyn Connection>,
    dialect: Arc<dyn Dialect>,
    reflector: Arc<dyn SchemaReflector>,
}

impl Database {
    /// Creates a database from its parts.
    pub fn new(
        name: impl Into<String>,
        connection: Arc<dyn Connection>,
        dialect: Arc<dyn Dialect>,
        reflector: Arc<dyn SchemaReflector>,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            read_only: false,
            connection,
            dialect,
            reflector,
        }
    }

    /// Opens a SQLite database, e.g. `sqlite:db.sqlite3` or `sqlite::memory:`.
    pub async fn sqlite(url: &str) -> Result<Self> {
        let connection = SqliteConnection::connect(url).await?;
        debug!(url = %url, "Opened SQLite database");
        Ok(Self::new(
            url,
            Arc::new(connection),
            Arc::new(SqliteDialect::new()),
            Arc::new(SqliteReflector::new()),
        ))
    }

    /// Sets the table name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Marks the database read-only: [`synchronize`](Self::synchronize) is refused.
    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Name the database was opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prefix shared by every table name.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether schema changes are refused.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The connection statements run on.
    #[must_use]
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// The dialect generating DDL.
    #[must_use]
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    /// Handle on table `name`: reflected if it exists, empty otherwise.
    pub async fn table(&self, name: &str) -> Result<Table> {
        let full_name = format!("{}{}", self.prefix, name);
        let reflected = self
            .reflector
            .reflect(self.connection.as_ref(), &full_name, &self.prefix)
            .await?;

        Ok(match reflected {
            Some(state) => Table::reflected(
                Arc::clone(&self.connection),
                Arc::clone(&self.dialect),
                state,
            ),
            None => Table::new(
                Arc::clone(&self.connection),
                Arc::clone(&self.dialect),
                name,
                &self.prefix,
            ),
        })
    }

    /// Whether table `name` exists.
    pub async fn has_table(&self, name: &str) -> Result<bool> {
        Ok(self.table_names().await?.iter().any(|t| t == name))
    }

    /// Names of the tables carrying this database's prefix, prefix stripped.
    pub async fn table_names(&self) -> Result<Vec<String>> {
        let names = self.reflector.table_names(self.connection.as_ref()).await?;
        Ok(names
            .into_iter()
            .filter_map(|name| name.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    /// Handles on every existing table.
    pub async fn tables(&self) -> Result<Vec<Table>> {
        let mut tables = Vec::new();
        for name in self.table_names().await? {
            tables.push(self.table(&name).await?);
        }
        Ok(tables)
    }

    /// Saves `tables` together, dropping every undeclared entity.
    pub async fn synchronize(&self, tables: &mut [Table]) -> Result<()> {
        self.synchronize_with(tables, DropUndeclared::ALL).await
    }

    /// Saves `tables` together, dropping only the undeclared entities
    /// selected by `drops`.
    pub async fn synchronize_with(&self, tables: &mut [Table], drops: DropUndeclared) -> Result<()> {
        if self.read_only {
            return Err(SchemaError::ReadOnly(self.name.clone()));
        }
        Bus::new().with_drops(drops).synchronize(tables).await
    }
}
