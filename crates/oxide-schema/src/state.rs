//! Table state.
//!
//! A [`TableState`] is the full structural description of one table at a
//! point in time. A live [`Table`](crate::table::Table) owns two of them:
//! the declared state and the shadow snapshot of what the database holds.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};
use crate::schema::{ColumnSchema, ForeignKeySchema, IndexSchema};

/// Structural description of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableState {
    /// Table name, prefix included.
    pub name: String,
    /// Prefix shared by every table of the owning database.
    #[serde(default)]
    pub prefix: String,
    /// Primary key column(s).
    #[serde(default)]
    pub primary_keys: Vec<String>,
    /// Columns keyed by name.
    #[serde(default)]
    pub columns: IndexMap<String, ColumnSchema>,
    /// Indexes keyed by name.
    #[serde(default)]
    pub indexes: IndexMap<String, IndexSchema>,
    /// Foreign keys keyed by name.
    #[serde(default)]
    pub foreign_keys: IndexMap<String, ForeignKeySchema>,
    /// Pending column renames, new name -> name in the shadow snapshot.
    #[serde(skip)]
    column_renames: IndexMap<String, String>,
    /// Pending index renames, new name -> name in the shadow snapshot.
    #[serde(skip)]
    index_renames: IndexMap<String, String>,
}

impl TableState {
    /// Creates an empty state. `name` must already include `prefix`.
    #[must_use]
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Table name without the prefix.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.name.strip_prefix(&self.prefix).unwrap_or(&self.name)
    }

    /// Gets a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.get(name)
    }

    /// Gets a mutable column by name.
    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnSchema> {
        self.columns.get_mut(name)
    }

    /// Whether a column exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Adds or replaces a column.
    pub fn add_column(&mut self, column: ColumnSchema) {
        self.columns.insert(column.name.clone(), column);
    }

    /// Removes a column together with every index and foreign key that
    /// references it. Returns the names of the removed indexes and foreign
    /// keys.
    pub fn remove_column(&mut self, name: &str) -> Option<(ColumnSchema, Vec<String>, Vec<String>)> {
        let column = self.columns.shift_remove(name)?;
        self.column_renames.shift_remove(name);
        self.primary_keys.retain(|pk| pk != name);

        let indexes: Vec<String> = self
            .indexes
            .values()
            .filter(|i| i.columns.iter().any(|c| c == name))
            .map(|i| i.name.clone())
            .collect();
        for index in &indexes {
            self.remove_index(index);
        }

        let foreign_keys: Vec<String> = self
            .foreign_keys
            .values()
            .filter(|fk| fk.columns.iter().any(|c| c == name))
            .map(|fk| fk.name.clone())
            .collect();
        for fk in &foreign_keys {
            self.foreign_keys.shift_remove(fk);
        }

        Some((column, indexes, foreign_keys))
    }

    /// Renames a column, carrying the change into indexes, foreign keys and
    /// the primary key.
    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        if !self.has_column(old) {
            return Err(SchemaError::InvalidDeclaration(format!(
                "Column '{}' does not exist in table '{}'",
                old, self.name
            )));
        }
        if self.has_column(new) {
            return Err(SchemaError::InvalidDeclaration(format!(
                "Column '{}' already exists in table '{}'",
                new, self.name
            )));
        }

        rekey(&mut self.columns, old, new, |c| c.name = new.to_string());
        rename_in(&mut self.primary_keys, old, new);
        for index in self.indexes.values_mut() {
            rename_in(&mut index.columns, old, new);
        }
        for fk in self.foreign_keys.values_mut() {
            rename_in(&mut fk.columns, old, new);
        }

        let origin = self
            .column_renames
            .shift_remove(old)
            .unwrap_or_else(|| old.to_string());
        if origin != new {
            self.column_renames.insert(new.to_string(), origin);
        }
        Ok(())
    }

    /// Gets an index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.get(name)
    }

    /// Finds the index covering exactly `columns`.
    #[must_use]
    pub fn find_index(&self, columns: &[String]) -> Option<&IndexSchema> {
        self.indexes.values().find(|i| i.covers(columns))
    }

    /// Adds or replaces an index.
    pub fn add_index(&mut self, index: IndexSchema) {
        self.indexes.insert(index.name.clone(), index);
    }

    /// Removes an index by name.
    pub fn remove_index(&mut self, name: &str) -> Option<IndexSchema> {
        self.index_renames.shift_remove(name);
        self.indexes.shift_remove(name)
    }

    /// Renames an index.
    pub fn rename_index(&mut self, old: &str, new: &str) -> Result<()> {
        if !self.indexes.contains_key(old) {
            return Err(SchemaError::InvalidDeclaration(format!(
                "Index '{}' does not exist in table '{}'",
                old, self.name
            )));
        }
        if self.indexes.contains_key(new) {
            return Err(SchemaError::InvalidDeclaration(format!(
                "Index '{}' already exists in table '{}'",
                new, self.name
            )));
        }

        rekey(&mut self.indexes, old, new, |i| i.name = new.to_string());
        let origin = self
            .index_renames
            .shift_remove(old)
            .unwrap_or_else(|| old.to_string());
        if origin != new {
            self.index_renames.insert(new.to_string(), origin);
        }
        Ok(())
    }

    /// Gets a foreign key by name.
    #[must_use]
    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKeySchema> {
        self.foreign_keys.get(name)
    }

    /// Finds the foreign key declared over exactly `columns`.
    #[must_use]
    pub fn find_foreign_key(&self, columns: &[String]) -> Option<&ForeignKeySchema> {
        self.foreign_keys.values().find(|fk| fk.columns == columns)
    }

    /// Adds or replaces a foreign key.
    pub fn add_foreign_key(&mut self, fk: ForeignKeySchema) {
        self.foreign_keys.insert(fk.name.clone(), fk);
    }

    /// Removes a foreign key by name.
    pub fn remove_foreign_key(&mut self, name: &str) -> Option<ForeignKeySchema> {
        self.foreign_keys.shift_remove(name)
    }

    /// Name a column had in the shadow snapshot.
    #[must_use]
    pub fn column_origin<'a>(&'a self, name: &'a str) -> &'a str {
        self.column_renames.get(name).map_or(name, String::as_str)
    }

    /// Name an index had in the shadow snapshot.
    #[must_use]
    pub fn index_origin<'a>(&'a self, name: &'a str) -> &'a str {
        self.index_renames.get(name).map_or(name, String::as_str)
    }

    /// Whether `name` is the old name of a pending column rename.
    #[must_use]
    pub fn is_renamed_away(&self, name: &str) -> bool {
        self.column_renames.values().any(|origin| origin == name)
    }

    /// Pending column renames as `(new, old)` pairs.
    pub fn column_renames(&self) -> impl Iterator<Item = (&str, &str)> {
        self.column_renames
            .iter()
            .map(|(new, old)| (new.as_str(), old.as_str()))
    }

    /// Forgets pending column renames once they have been applied.
    pub fn clear_column_renames(&mut self) {
        self.column_renames.clear();
    }

    /// Forgets pending index renames once they have been applied.
    pub fn clear_index_renames(&mut self) {
        self.index_renames.clear();
    }

    /// Names of referenced tables with the prefix stripped.
    #[must_use]
    pub fn dependencies(&self) -> Vec<String> {
        let mut dependencies: Vec<String> = Vec::new();
        for fk in self.foreign_keys.values() {
            let name = fk
                .foreign_table
                .strip_prefix(&self.prefix)
                .unwrap_or(&fk.foreign_table)
                .to_string();
            if !dependencies.contains(&name) {
                dependencies.push(name);
            }
        }
        dependencies
    }
}

/// Replaces key `old` by `new` keeping the entry position.
fn rekey<V>(map: &mut IndexMap<String, V>, old: &str, new: &str, update: impl FnOnce(&mut V)) {
    if let Some((position, _, mut value)) = map.shift_remove_full(old) {
        update(&mut value);
        let (last, _) = map.insert_full(new.to_string(), value);
        map.move_index(last, position);
    }
}

fn rename_in(names: &mut [String], old: &str, new: &str) {
    for name in names.iter_mut().filter(|n| n.as_str() == old) {
        *name = new.to_string();
    }
}
