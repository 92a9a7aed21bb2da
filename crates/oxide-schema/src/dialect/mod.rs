//! Database dialect implementations.
//!
//! A dialect turns descriptor changes into DDL. The trait provides generic
//! SQL for everything that is portable; dialects override what their database
//! does differently, and may take over the sync of an existing table entirely
//! through a table rebuild.

mod postgres;
mod sqlite;

use std::fmt;

pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use crate::behavior::Behavior;
use crate::comparator::TableDiff;
use crate::error::{Result, SchemaError};
use crate::schema::{AbstractType, ColumnSchema, DefaultValue, ForeignKeySchema, IndexSchema};
use crate::state::TableState;

/// A column of a rebuilt table and the source expression feeding it.
#[derive(Debug, Clone, Copy)]
pub struct ColumnCopy<'a> {
    /// Column in the rebuilt table.
    pub target: &'a ColumnSchema,
    /// Column of the original table holding the data.
    pub source: &'a ColumnSchema,
}

/// Trait for database-specific DDL generation.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Longest identifier the database accepts.
    fn max_identifier_length(&self) -> usize {
        63
    }

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quotes and joins a column list.
    fn quote_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.quote_identifier(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Returns the SQL type for a column.
    fn type_name(&self, column: &ColumnSchema) -> String;

    /// Keyword appended to an inline auto-increment primary key.
    fn auto_increment_keyword(&self) -> Option<&'static str> {
        None
    }

    /// Adjusts a declared column to what the database will report back.
    fn normalize_column(&self, _column: &mut ColumnSchema) {}

    /// SQL for a default value.
    fn default_sql(&self, value: &DefaultValue) -> Option<String> {
        value.to_sql()
    }

    /// Check constraint restricting an enum column.
    fn enum_check(&self, _table: &str, column: &ColumnSchema) -> Option<String> {
        if column.abstract_type != Some(AbstractType::Enum) {
            return None;
        }
        Some(format!(
            "CHECK ({} IN ({}))",
            self.quote_identifier(&column.name),
            enum_list(&column.enum_values)
        ))
    }

    /// Generates column definition SQL. `primary` marks the single
    /// auto-increment primary key, declared inline.
    fn column_definition(&self, table: &str, column: &ColumnSchema, primary: bool) -> String {
        let mut parts = vec![self.quote_identifier(&column.name), self.type_name(column)];

        if primary {
            parts.push("PRIMARY KEY".to_string());
            if let Some(keyword) = self.auto_increment_keyword() {
                parts.push(keyword.to_string());
            }
        }

        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }

        if let Some(default_sql) = self.default_sql(&column.default) {
            parts.push(format!("DEFAULT {default_sql}"));
        }

        if let Some(check) = self.enum_check(table, column) {
            parts.push(check);
        }

        parts.join(" ")
    }

    /// Foreign key constraint clause.
    fn foreign_key_constraint(&self, fk: &ForeignKeySchema) -> String {
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            self.quote_identifier(&fk.name),
            self.quote_list(&fk.columns),
            self.quote_identifier(&fk.foreign_table),
            self.quote_list(&fk.foreign_columns),
            fk.on_delete.to_sql(),
            fk.on_update.to_sql()
        )
    }

    /// Generates SQL for creating a table with its primary key and foreign
    /// keys. Indexes are created separately.
    fn create_table(&self, state: &TableState) -> Vec<String> {
        let inline = inline_primary_key(state);
        let mut lines: Vec<String> = state
            .columns
            .values()
            .map(|c| self.column_definition(&state.name, c, inline == Some(c.name.as_str())))
            .collect();

        if inline.is_none() && !state.primary_keys.is_empty() {
            lines.push(format!("PRIMARY KEY ({})", self.quote_list(&state.primary_keys)));
        }
        for fk in state.foreign_keys.values() {
            lines.push(self.foreign_key_constraint(fk));
        }

        vec![format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(&state.name),
            lines.join(",\n  ")
        )]
    }

    /// Generates SQL for dropping a table.
    fn drop_table(&self, name: &str) -> Vec<String> {
        vec![format!("DROP TABLE {}", self.quote_identifier(name))]
    }

    /// Generates SQL for renaming a table.
    fn rename_table(&self, old_name: &str, new_name: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(old_name),
            self.quote_identifier(new_name)
        )]
    }

    /// Generates SQL for adding a column.
    fn add_column(&self, table: &str, column: &ColumnSchema) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(table, column, false)
        )]
    }

    /// Generates SQL for dropping a column.
    fn drop_column(&self, table: &str, column: &ColumnSchema) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(&column.name)
        )]
    }

    /// Generates SQL turning `initial` into `current`. No generic form exists.
    fn alter_column(
        &self,
        table: &str,
        current: &ColumnSchema,
        _initial: &ColumnSchema,
    ) -> Result<Vec<String>> {
        Err(SchemaError::AlterColumnUnsupported {
            dialect: self.name(),
            table: table.to_string(),
            column: current.name.clone(),
        })
    }

    /// Generates SQL for creating an index.
    fn create_index(&self, table: &str, index: &IndexSchema) -> Vec<String> {
        vec![format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index.name),
            self.quote_identifier(table),
            self.quote_list(&index.columns)
        )]
    }

    /// Generates SQL for dropping an index.
    fn drop_index(&self, _table: &str, index: &IndexSchema) -> Vec<String> {
        vec![format!("DROP INDEX {}", self.quote_identifier(&index.name))]
    }

    /// Generates SQL turning index `initial` into `current`.
    fn alter_index(&self, table: &str, current: &IndexSchema, initial: &IndexSchema) -> Vec<String> {
        let mut statements = self.drop_index(table, initial);
        statements.extend(self.create_index(table, current));
        statements
    }

    /// Generates SQL for adding a foreign key to an existing table.
    fn add_foreign_key(&self, table: &str, fk: &ForeignKeySchema) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(table),
            self.foreign_key_constraint(fk)
        )]
    }

    /// Generates SQL for dropping a foreign key.
    fn drop_foreign_key(&self, table: &str, fk: &ForeignKeySchema) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote_identifier(table),
            self.quote_identifier(&fk.name)
        )]
    }

    /// Generates SQL turning foreign key `initial` into `current`.
    fn alter_foreign_key(
        &self,
        table: &str,
        current: &ForeignKeySchema,
        initial: &ForeignKeySchema,
    ) -> Vec<String> {
        let mut statements = self.drop_foreign_key(table, initial);
        statements.extend(self.add_foreign_key(table, current));
        statements
    }

    /// Whether the changes allowed by `behavior` must be applied by
    /// rebuilding the table instead of altering it.
    fn requires_rebuild(&self, _diff: &TableDiff<'_>, _behavior: Behavior) -> bool {
        false
    }

    /// Generates SQL replacing table `source` by a new table shaped like
    /// `target`, carrying over the data of `copy`.
    fn rebuild_table(&self, source: &str, target: &TableState, copy: &[ColumnCopy<'_>]) -> Vec<String> {
        let mut replacement = target.clone();
        replacement.name = format!("{}__rebuild", target.name);

        let mut statements = self.create_table(&replacement);

        if !copy.is_empty() {
            let columns: Vec<String> = copy.iter().map(|c| c.target.name.clone()).collect();
            let selected: Vec<String> = copy.iter().map(|c| self.copy_expression(c)).collect();
            statements.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                self.quote_identifier(&replacement.name),
                self.quote_list(&columns),
                selected.join(", "),
                self.quote_identifier(source)
            ));
        }

        statements.extend(self.drop_table(source));
        statements.extend(self.rename_table(&replacement.name, &target.name));
        for index in target.indexes.values() {
            statements.extend(self.create_index(&target.name, index));
        }
        statements
    }

    /// Select expression feeding a rebuilt column.
    fn copy_expression(&self, copy: &ColumnCopy<'_>) -> String {
        let source = self.quote_identifier(&copy.source.name);
        if copy.source.nullable && !copy.target.nullable {
            if let Some(default_sql) = self.default_sql(&copy.target.default) {
                return format!("COALESCE({source}, {default_sql})");
            }
        }
        source
    }
}

/// The single auto-increment primary key declared inline, if any.
pub(crate) fn inline_primary_key(state: &TableState) -> Option<&str> {
    match state.primary_keys.as_slice() {
        [pk] => state
            .column(pk)
            .and_then(|c| c.abstract_type)
            .filter(|t| t.is_auto_increment())
            .map(|_| pk.as_str()),
        _ => None,
    }
}

/// Quoted, comma separated enum values.
pub(crate) fn enum_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Whether two columns differ by name only.
pub(crate) fn renamed_only(current: &ColumnSchema, initial: &ColumnSchema) -> bool {
    let mut renamed = initial.clone();
    renamed.name.clone_from(&current.name);
    current.same_as(&renamed)
}
