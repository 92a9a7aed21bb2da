//! Live table handle.
//!
//! A [`Table`] holds the declared state of one table, the shadow snapshot of
//! what the database holds, and the set of entities declared during the
//! current pass. Declarations only change memory; [`Table::save`] diffs the
//! two states and runs the resulting DDL in a transaction.
//!
//! ```ignore
//! let mut users = database.table("users").await?;
//! users.column("id").primary();
//! users.column("email").string(255);
//! users.index(&["email"]).unique(true);
//! users.save(false, false, false).await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::behavior::Behavior;
use crate::comparator::Comparator;
use crate::dialect::Dialect;
use crate::driver::{Connection, RecordingConnection};
use crate::error::{Result, SchemaError};
use crate::handler::{Handler, SyncOutcome, target_state};
use crate::schema::{self, ColumnSchema, ForeignKeySchema, IndexSchema};
use crate::state::TableState;

/// Which undeclared entities a save drops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropUndeclared {
    /// Drop undeclared columns.
    pub columns: bool,
    /// Drop undeclared indexes.
    pub indexes: bool,
    /// Drop undeclared foreign keys.
    pub foreign_keys: bool,
}

impl DropUndeclared {
    /// Keep everything.
    pub const NONE: Self = Self {
        columns: false,
        indexes: false,
        foreign_keys: false,
    };

    /// Drop every undeclared entity.
    pub const ALL: Self = Self {
        columns: true,
        indexes: true,
        foreign_keys: true,
    };
}

#[derive(Debug, Clone, Default)]
struct Declared {
    columns: HashSet<String>,
    indexes: HashSet<String>,
    foreign_keys: HashSet<String>,
}

/// Saved copy of a table, used to undo a failed multi-table run.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    current: TableState,
    initial: TableState,
    exists: bool,
    drop_pending: bool,
    declared: Declared,
}

/// Handle on one table of a database.
#[derive(Debug, Clone)]
pub struct Table {
    connection: Arc<dyn Connection>,
    dialect: Arc<dyn Dialect>,
    current: TableState,
    initial: TableState,
    exists: bool,
    drop_pending: bool,
    declared: Declared,
}

impl Table {
    /// Creates a handle on a table that does not exist yet.
    pub fn new(
        connection: Arc<dyn Connection>,
        dialect: Arc<dyn Dialect>,
        name: &str,
        prefix: &str,
    ) -> Self {
        let state = TableState::new(format!("{prefix}{name}"), prefix);
        Self {
            connection,
            dialect,
            initial: state.clone(),
            current: state,
            exists: false,
            drop_pending: false,
            declared: Declared::default(),
        }
    }

    /// Creates a handle on an existing table from its reflected state.
    pub fn reflected(
        connection: Arc<dyn Connection>,
        dialect: Arc<dyn Dialect>,
        state: TableState,
    ) -> Self {
        Self {
            connection,
            dialect,
            initial: state.clone(),
            current: state,
            exists: true,
            drop_pending: false,
            declared: Declared::default(),
        }
    }

    /// Full table name, prefix included.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.current.name
    }

    /// Table name without the prefix.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.current.short_name()
    }

    /// Declared state.
    #[must_use]
    pub fn state(&self) -> &TableState {
        &self.current
    }

    /// Shadow snapshot of what the database holds.
    #[must_use]
    pub fn initial(&self) -> &TableState {
        &self.initial
    }

    /// Whether the table exists in the database.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Whether [`drop`](Self::drop) was called and not saved yet.
    #[must_use]
    pub fn is_drop_pending(&self) -> bool {
        self.drop_pending
    }

    /// Connection the table lives on.
    #[must_use]
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Dialect used to generate DDL.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Names of the tables this one references, prefix stripped.
    #[must_use]
    pub fn dependencies(&self) -> Vec<String> {
        self.current.dependencies()
    }

    fn owned(columns: &[&str]) -> Vec<String> {
        columns.iter().map(|c| (*c).to_string()).collect()
    }

    /// Declares a column, creating it if needed.
    pub fn column(&mut self, name: &str) -> &mut ColumnSchema {
        self.declared.columns.insert(name.to_string());
        self.current
            .columns
            .entry(name.to_string())
            .or_insert_with(|| ColumnSchema::new(name))
    }

    /// Declares an index over `columns`, creating it if needed.
    pub fn index(&mut self, columns: &[&str]) -> &mut IndexSchema {
        let columns = Self::owned(columns);
        let name = match self.current.find_index(&columns) {
            Some(index) => index.name.clone(),
            None => schema::index_name(
                &self.current.name,
                &columns,
                self.dialect.max_identifier_length(),
            ),
        };
        self.declared.indexes.insert(name.clone());
        self.current
            .indexes
            .entry(name.clone())
            .or_insert_with(|| IndexSchema::new(name, columns))
    }

    /// Declares a foreign key over `columns`, creating it if needed. A
    /// supporting index is declared along with it.
    pub fn foreign(&mut self, columns: &[&str]) -> &mut ForeignKeySchema {
        self.index(columns);

        let columns = Self::owned(columns);
        let name = match self.current.find_foreign_key(&columns) {
            Some(fk) => fk.name.clone(),
            None => schema::foreign_key_name(
                &self.current.name,
                &columns,
                self.dialect.max_identifier_length(),
            ),
        };
        self.declared.foreign_keys.insert(name.clone());
        self.current
            .foreign_keys
            .entry(name.clone())
            .or_insert_with(|| ForeignKeySchema::new(name, columns))
    }

    /// Declares a foreign key over `columns` referencing `table`, given
    /// without the database prefix.
    pub fn references(
        &mut self,
        columns: &[&str],
        table: &str,
        foreign_columns: &[&str],
    ) -> &mut ForeignKeySchema {
        let foreign_table = format!("{}{}", self.current.prefix, table);
        self.foreign(columns)
            .references(foreign_table, foreign_columns.iter().copied())
    }

    /// Sets the primary key. Only allowed before the table exists.
    pub fn set_primary_keys(&mut self, columns: &[&str]) -> Result<()> {
        let columns = Self::owned(columns);
        if self.exists && columns != self.current.primary_keys {
            return Err(SchemaError::PrimaryKeyChange {
                table: self.current.name.clone(),
            });
        }
        self.current.primary_keys = columns;
        Ok(())
    }

    /// Drops a column along with the indexes and foreign keys using it.
    pub fn drop_column(&mut self, name: &str) -> Result<()> {
        let (_, indexes, foreign_keys) = self.current.remove_column(name).ok_or_else(|| {
            SchemaError::InvalidDeclaration(format!(
                "Column '{}' does not exist in table '{}'",
                name, self.current.name
            ))
        })?;
        self.declared.columns.remove(name);
        for index in &indexes {
            self.declared.indexes.remove(index);
        }
        for fk in &foreign_keys {
            self.declared.foreign_keys.remove(fk);
        }
        Ok(())
    }

    /// Drops the index over `columns`.
    pub fn drop_index(&mut self, columns: &[&str]) -> Result<()> {
        let name = self.index_named(columns)?;
        self.current.remove_index(&name);
        self.declared.indexes.remove(&name);
        Ok(())
    }

    /// Drops the foreign key over `columns`.
    pub fn drop_foreign(&mut self, columns: &[&str]) -> Result<()> {
        let owned = Self::owned(columns);
        let name = self
            .current
            .find_foreign_key(&owned)
            .map(|fk| fk.name.clone())
            .ok_or_else(|| {
                SchemaError::InvalidDeclaration(format!(
                    "No foreign key on ({}) in table '{}'",
                    columns.join(", "),
                    self.current.name
                ))
            })?;
        self.current.remove_foreign_key(&name);
        self.declared.foreign_keys.remove(&name);
        Ok(())
    }

    /// Renames a column.
    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        self.current.rename_column(old, new)?;
        self.declared.columns.remove(old);
        self.declared.columns.insert(new.to_string());
        Ok(())
    }

    /// Renames the index over `columns`.
    pub fn rename_index(&mut self, columns: &[&str], new: &str) -> Result<()> {
        let old = self.index_named(columns)?;
        self.current.rename_index(&old, new)?;
        self.declared.indexes.remove(&old);
        self.declared.indexes.insert(new.to_string());
        Ok(())
    }

    fn index_named(&self, columns: &[&str]) -> Result<String> {
        let owned = Self::owned(columns);
        self.current
            .find_index(&owned)
            .map(|index| index.name.clone())
            .ok_or_else(|| {
                SchemaError::InvalidDeclaration(format!(
                    "No index on ({}) in table '{}'",
                    columns.join(", "),
                    self.current.name
                ))
            })
    }

    /// Renames the table. The new name applies immediately; the DDL runs on
    /// the next save.
    pub fn rename(&mut self, name: &str) {
        self.current.name = format!("{}{}", self.current.prefix, name);
    }

    /// Marks the table for removal on the next save.
    pub fn drop(&mut self) {
        self.drop_pending = true;
    }

    /// Forgets which entities were declared, starting a new pass.
    pub fn reset_declarations(&mut self) {
        self.declared = Declared::default();
    }

    /// Saves a copy of the table.
    #[must_use]
    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            current: self.current.clone(),
            initial: self.initial.clone(),
            exists: self.exists,
            drop_pending: self.drop_pending,
            declared: self.declared.clone(),
        }
    }

    /// Restores a copy taken by [`snapshot`](Self::snapshot).
    pub fn restore(&mut self, snapshot: TableSnapshot) {
        self.current = snapshot.current;
        self.initial = snapshot.initial;
        self.exists = snapshot.exists;
        self.drop_pending = snapshot.drop_pending;
        self.declared = snapshot.declared;
    }

    /// Whether saving with `drops` would change the database.
    pub fn has_changes(&self, drops: DropUndeclared) -> Result<bool> {
        let mut preview = self.clone();
        preview.prepare(drops)?;
        Ok(preview.needs_sync())
    }

    /// Returns the statements a save with `drops` would run, without
    /// touching the database.
    pub async fn plan(&self, drops: DropUndeclared) -> Result<Vec<String>> {
        let recorder = Arc::new(RecordingConnection::new("plan"));
        let mut preview = self.clone();
        preview.connection = Arc::clone(&recorder) as Arc<dyn Connection>;
        preview.save_with(Behavior::ALL, drops).await?;
        Ok(recorder.statements())
    }

    /// Synchronizes the table with every kind of change allowed. The flags
    /// select which undeclared columns, indexes and foreign keys are dropped.
    pub async fn save(
        &mut self,
        drop_undeclared_columns: bool,
        drop_undeclared_indexes: bool,
        drop_undeclared_foreigns: bool,
    ) -> Result<SyncOutcome> {
        self.save_with(
            Behavior::ALL,
            DropUndeclared {
                columns: drop_undeclared_columns,
                indexes: drop_undeclared_indexes,
                foreign_keys: drop_undeclared_foreigns,
            },
        )
        .await
    }

    /// Synchronizes the table inside its own transaction. On failure the
    /// declared and shadow states are left as they were before the call.
    pub async fn save_with(
        &mut self,
        behavior: Behavior,
        drops: DropUndeclared,
    ) -> Result<SyncOutcome> {
        let snapshot = self.snapshot();
        match self.save_prepared(behavior, drops).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.restore(snapshot);
                Err(err)
            }
        }
    }

    async fn save_prepared(
        &mut self,
        behavior: Behavior,
        drops: DropUndeclared,
    ) -> Result<SyncOutcome> {
        self.prepare(drops)?;
        if !self.needs_sync() {
            debug!(table = %self.current.name, "No schema changes");
            return Ok(SyncOutcome::default());
        }

        let connection = Arc::clone(&self.connection);
        connection.begin().await?;

        let result = Handler::new(self.dialect.as_ref(), connection.as_ref())
            .sync(self, behavior)
            .await;

        match result {
            Ok(outcome) => {
                connection.commit().await?;
                self.apply(behavior, &outcome);
                info!(
                    table = %self.current.name,
                    statements = outcome.statements.len(),
                    %behavior,
                    "Table synchronized"
                );
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback) = connection.rollback().await {
                    warn!(table = %self.current.name, error = %rollback, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Synchronizes with an already open transaction, as part of a larger run.
    pub(crate) async fn sync_in_transaction(
        &mut self,
        behavior: Behavior,
        drops: DropUndeclared,
    ) -> Result<SyncOutcome> {
        self.prepare(drops)?;
        if !self.needs_sync() {
            return Ok(SyncOutcome::default());
        }
        let connection = Arc::clone(&self.connection);
        let outcome = Handler::new(self.dialect.as_ref(), connection.as_ref())
            .sync(self, behavior)
            .await?;
        self.apply(behavior, &outcome);
        Ok(outcome)
    }

    fn needs_sync(&self) -> bool {
        if self.drop_pending {
            return self.exists;
        }
        if !self.exists {
            return true;
        }
        let diff = Comparator::new(&self.initial, &self.current).diff();
        diff.has_changes() || diff.renamed
    }

    /// Moves the shadow snapshot forward by what was executed.
    fn apply(&mut self, behavior: Behavior, outcome: &SyncOutcome) {
        if outcome.dropped {
            let empty = TableState::new(self.initial.name.clone(), self.initial.prefix.clone());
            self.current = empty.clone();
            self.initial = empty;
            self.exists = false;
            self.drop_pending = false;
            self.declared = Declared::default();
            return;
        }

        if outcome.created {
            let mut created = target_state(&self.initial, &self.current, Behavior::ALL);
            if !behavior.contains(Behavior::CREATE_INDEXES) {
                created.indexes.clear();
            }
            self.initial = created;
            self.exists = true;
            self.current.clear_column_renames();
            self.current.clear_index_renames();
            return;
        }

        if !self.exists || self.drop_pending {
            return;
        }

        self.initial = target_state(&self.initial, &self.current, behavior);
        if behavior.contains(Behavior::ALTER_COLUMNS) || outcome.rebuilt {
            self.current.clear_column_renames();
        }
        if behavior.contains(Behavior::ALTER_INDEXES) || outcome.rebuilt {
            self.current.clear_index_renames();
        }
    }

    /// Brings the declared state in shape for diffing: applies renames done
    /// through descriptor setters, drops undeclared entities as requested,
    /// normalizes columns, injects defaults and validates the result.
    fn prepare(&mut self, drops: DropUndeclared) -> Result<()> {
        // A table about to be dropped has nothing left to diff.
        if self.drop_pending {
            return Ok(());
        }
        self.sync_keys()?;

        if self.exists {
            self.drop_undeclared(drops);
        } else if self.current.primary_keys.is_empty() {
            self.current.primary_keys = self
                .current
                .columns
                .values()
                .filter(|c| c.abstract_type.is_some_and(|t| t.is_auto_increment()))
                .map(|c| c.name.clone())
                .collect();
        }

        let table = self.current.name.clone();
        let primary_keys = self.current.primary_keys.clone();
        for column in self.current.columns.values_mut() {
            if column.abstract_type.is_none() {
                return Err(SchemaError::MissingColumnType {
                    table,
                    column: column.name.clone(),
                });
            }
            self.dialect.normalize_column(column);
            if !column.nullable
                && !column.default.is_some()
                && !primary_keys.contains(&column.name)
            {
                if let Some(default) = column.synthetic_default() {
                    column.default = default;
                }
            }
        }

        self.validate()
    }

    /// Re-keys descriptors whose name was changed through a setter.
    fn sync_keys(&mut self) -> Result<()> {
        let columns: Vec<(String, String)> = self
            .current
            .columns
            .iter()
            .filter(|(key, column)| **key != column.name)
            .map(|(key, column)| (key.clone(), column.name.clone()))
            .collect();
        for (key, name) in columns {
            if let Some(column) = self.current.column_mut(&key) {
                column.name.clone_from(&key);
            }
            self.rename_column(&key, &name)?;
        }

        let indexes: Vec<(String, String)> = self
            .current
            .indexes
            .iter()
            .filter(|(key, index)| **key != index.name)
            .map(|(key, index)| (key.clone(), index.name.clone()))
            .collect();
        for (key, name) in indexes {
            if let Some(index) = self.current.indexes.get_mut(&key) {
                index.name.clone_from(&key);
            }
            self.current.rename_index(&key, &name)?;
            self.declared.indexes.remove(&key);
            self.declared.indexes.insert(name);
        }

        let foreign_keys: Vec<(String, String)> = self
            .current
            .foreign_keys
            .iter()
            .filter(|(key, fk)| **key != fk.name)
            .map(|(key, fk)| (key.clone(), fk.name.clone()))
            .collect();
        for (key, name) in foreign_keys {
            if self.current.foreign_keys.contains_key(&name) {
                return Err(SchemaError::InvalidDeclaration(format!(
                    "Foreign key '{}' already exists in table '{}'",
                    name, self.current.name
                )));
            }
            if let Some(fk) = self.current.remove_foreign_key(&key) {
                self.current.add_foreign_key(fk);
            }
            self.declared.foreign_keys.remove(&key);
            self.declared.foreign_keys.insert(name);
        }
        Ok(())
    }

    fn drop_undeclared(&mut self, drops: DropUndeclared) {
        if drops.foreign_keys {
            let undeclared: Vec<String> = self
                .current
                .foreign_keys
                .keys()
                .filter(|name| !self.declared.foreign_keys.contains(*name))
                .cloned()
                .collect();
            for name in undeclared {
                debug!(table = %self.current.name, foreign_key = %name, "Dropping undeclared foreign key");
                self.current.remove_foreign_key(&name);
            }
        }

        if drops.indexes {
            let undeclared: Vec<String> = self
                .current
                .indexes
                .keys()
                .filter(|name| !self.declared.indexes.contains(*name))
                .cloned()
                .collect();
            for name in undeclared {
                debug!(table = %self.current.name, index = %name, "Dropping undeclared index");
                self.current.remove_index(&name);
            }
        }

        if drops.columns {
            let undeclared: Vec<String> = self
                .current
                .columns
                .keys()
                .filter(|name| !self.declared.columns.contains(*name))
                .cloned()
                .collect();
            for name in undeclared {
                debug!(table = %self.current.name, column = %name, "Dropping undeclared column");
                self.current.remove_column(&name);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let state = &self.current;
        let invalid = |message: String| -> Result<()> { Err(SchemaError::InvalidDeclaration(message)) };

        if self.exists && Comparator::new(&self.initial, state).is_primary_changed() {
            return Err(SchemaError::PrimaryKeyChange {
                table: state.name.clone(),
            });
        }

        for pk in &state.primary_keys {
            if !state.has_column(pk) {
                return invalid(format!(
                    "Primary key column '{}' does not exist in table '{}'",
                    pk, state.name
                ));
            }
        }

        if self.exists {
            for column in state.columns.keys() {
                if state.is_renamed_away(column) {
                    return invalid(format!(
                        "Column '{}' of table '{}' is renamed and declared again in the same pass",
                        column, state.name
                    ));
                }
            }
        }

        for index in state.indexes.values() {
            if let Some(missing) = index.columns.iter().find(|c| !state.has_column(c)) {
                return invalid(format!(
                    "Index '{}' uses unknown column '{}' of table '{}'",
                    index.name, missing, state.name
                ));
            }
        }

        for fk in state.foreign_keys.values() {
            if fk.foreign_table.is_empty() || fk.foreign_columns.is_empty() {
                return invalid(format!(
                    "Foreign key '{}' of table '{}' has no referenced table",
                    fk.name, state.name
                ));
            }
            if fk.foreign_columns.len() != fk.columns.len() {
                return invalid(format!(
                    "Foreign key '{}' of table '{}' references {} column(s) from {}",
                    fk.name,
                    state.name,
                    fk.foreign_columns.len(),
                    fk.columns.len()
                ));
            }
            if let Some(missing) = fk.columns.iter().find(|c| !state.has_column(c)) {
                return invalid(format!(
                    "Foreign key '{}' uses unknown column '{}' of table '{}'",
                    fk.name, missing, state.name
                ));
            }
        }

        Ok(())
    }
}
