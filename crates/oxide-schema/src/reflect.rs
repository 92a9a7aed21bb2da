//! Schema reflection.
//!
//! Reads the structure of existing tables back into [`TableState`] values,
//! so that a declaration can be diffed against what the database holds.

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use indexmap::IndexMap;
use regex::Regex;
use tracing::debug;

use crate::dialect::{Dialect, SqliteDialect};
use crate::driver::{Connection, Row, Value};
use crate::error::Result;
use crate::schema::{
    self, AbstractType, ColumnSchema, DefaultValue, ForeignKeyAction, ForeignKeySchema,
    IndexSchema,
};
use crate::state::TableState;

/// Reads table structure from a live database.
#[async_trait]
pub trait SchemaReflector: Send + Sync + fmt::Debug {
    /// Names of every user table, prefix included.
    async fn table_names(&self, connection: &dyn Connection) -> Result<Vec<String>>;

    /// Structure of table `name`, or `None` if it does not exist.
    async fn reflect(
        &self,
        connection: &dyn Connection,
        name: &str,
        prefix: &str,
    ) -> Result<Option<TableState>>;
}

static NAMED_FOREIGN_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)CONSTRAINT\s+"((?:[^"]|"")+)"\s+FOREIGN\s+KEY\s*\(([^)]*)\)"#)
        .expect("valid foreign key regex")
});

static ENUM_CHECK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)CHECK\s*\(\s*"((?:[^"]|"")+)"\s+IN\s*\(((?:'(?:[^']|'')*'\s*,?\s*)+)\)\s*\)"#)
        .expect("valid enum check regex")
});

static ENUM_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'((?:[^']|'')*)'").expect("valid enum value regex"));

static AUTOINCREMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bAUTOINCREMENT\b").expect("valid autoincrement regex"));

/// SQLite reflector built on `sqlite_master` and the table-valued pragmas.
#[derive(Debug, Clone, Default)]
pub struct SqliteReflector {
    dialect: SqliteDialect,
}

impl SqliteReflector {
    /// Creates a new SQLite reflector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn columns(
        &self,
        connection: &dyn Connection,
        state: &mut TableState,
        sql: &str,
    ) -> Result<()> {
        let rows = connection
            .query(
                "SELECT * FROM pragma_table_info(?) ORDER BY cid",
                &[Value::from(state.name.as_str())],
            )
            .await?;

        let enums = enum_values(sql);
        let mut primary: Vec<(i64, String)> = Vec::new();

        for row in &rows {
            let name = text(row, "name");
            let mut column = ColumnSchema::new(name.clone());
            self.dialect.parse_type(&text(row, "type"), &mut column);
            column.nullable(integer(row, "notnull") == 0);

            if let Some(values) = enums.get(&name) {
                column.enumeration(values.clone());
            }

            let pk = integer(row, "pk");
            if pk > 0 {
                primary.push((pk, name.clone()));
            }

            if let Some(Value::Text(default)) = row.get("dflt_value") {
                let default = parse_default(default, &column);
                column.default_value(default);
            }
            state.add_column(column);
        }

        primary.sort();
        state.primary_keys = primary.into_iter().map(|(_, name)| name).collect();

        if let [pk] = state.primary_keys.as_slice() {
            let pk = pk.clone();
            if AUTOINCREMENT.is_match(sql) {
                if let Some(column) = state.column_mut(&pk) {
                    if column.abstract_type == Some(AbstractType::Integer) {
                        column.primary();
                    }
                }
            }
        }
        Ok(())
    }

    async fn indexes(&self, connection: &dyn Connection, state: &mut TableState) -> Result<()> {
        let list = connection
            .query(
                "SELECT * FROM pragma_index_list(?)",
                &[Value::from(state.name.as_str())],
            )
            .await?;

        for entry in &list {
            if text(entry, "origin") != "c" {
                continue;
            }
            let name = text(entry, "name");
            let info = connection
                .query(
                    "SELECT * FROM pragma_index_info(?) ORDER BY seqno",
                    &[Value::from(name.as_str())],
                )
                .await?;
            let columns = info.iter().map(|row| text(row, "name")).collect();
            let mut index = IndexSchema::new(name, columns);
            index.unique(integer(entry, "unique") != 0);
            state.add_index(index);
        }

        // Sorted so that reflection output does not depend on catalog order.
        state.indexes.sort_keys();
        Ok(())
    }

    async fn foreign_keys(
        &self,
        connection: &dyn Connection,
        state: &mut TableState,
        sql: &str,
    ) -> Result<()> {
        let rows = connection
            .query(
                "SELECT * FROM pragma_foreign_key_list(?) ORDER BY id, seq",
                &[Value::from(state.name.as_str())],
            )
            .await?;

        let mut grouped: IndexMap<i64, Vec<&Row>> = IndexMap::new();
        for row in &rows {
            grouped.entry(integer(row, "id")).or_default().push(row);
        }

        let names = foreign_key_names(sql);
        for parts in grouped.into_values() {
            let Some(first) = parts.first() else {
                continue;
            };
            let foreign_table = text(first, "table");
            let columns: Vec<String> = parts.iter().map(|row| text(row, "from")).collect();
            let mut foreign_columns: Vec<String> =
                parts.iter().map(|row| text(row, "to")).collect();
            if foreign_columns.iter().any(String::is_empty) {
                foreign_columns = self.primary_keys(connection, &foreign_table).await?;
            }

            let name = names.get(&columns).cloned().unwrap_or_else(|| {
                schema::limit_identifier(
                    format!("{}_foreign_{}", state.name, columns.join("_")),
                    self.dialect.max_identifier_length(),
                )
            });

            let mut fk = ForeignKeySchema::new(name, columns);
            fk.references(foreign_table, foreign_columns)
                .on_delete(ForeignKeyAction::from_sql(&text(first, "on_delete")))
                .on_update(ForeignKeyAction::from_sql(&text(first, "on_update")));
            state.add_foreign_key(fk);
        }
        Ok(())
    }

    async fn primary_keys(&self, connection: &dyn Connection, table: &str) -> Result<Vec<String>> {
        let rows = connection
            .query(
                "SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk",
                &[Value::from(table)],
            )
            .await?;
        Ok(rows.iter().map(|row| text(row, "name")).collect())
    }
}

#[async_trait]
impl SchemaReflector for SqliteReflector {
    async fn table_names(&self, connection: &dyn Connection) -> Result<Vec<String>> {
        let rows = connection
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?;
        Ok(rows.iter().map(|row| text(row, "name")).collect())
    }

    async fn reflect(
        &self,
        connection: &dyn Connection,
        name: &str,
        prefix: &str,
    ) -> Result<Option<TableState>> {
        let rows = connection
            .query(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[Value::from(name)],
            )
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let sql = text(row, "sql");

        let mut state = TableState::new(name, prefix);
        self.columns(connection, &mut state, &sql).await?;
        self.indexes(connection, &mut state).await?;
        self.foreign_keys(connection, &mut state, &sql).await?;

        debug!(
            table = %name,
            columns = state.columns.len(),
            indexes = state.indexes.len(),
            foreign_keys = state.foreign_keys.len(),
            "Reflected table"
        );
        Ok(Some(state))
    }
}

fn text(row: &Row, column: &str) -> String {
    match row.get(column) {
        Some(Value::Text(s)) => s.clone(),
        Some(Value::Integer(i)) => i.to_string(),
        Some(Value::Real(f)) => f.to_string(),
        _ => String::new(),
    }
}

fn integer(row: &Row, column: &str) -> i64 {
    row.get(column).and_then(Value::as_i64).unwrap_or_default()
}

fn unquote_identifier(name: &str) -> String {
    name.trim()
        .trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
        .replace("\"\"", "\"")
}

/// Foreign key names declared in a `CREATE TABLE` statement, keyed by their
/// column list.
fn foreign_key_names(sql: &str) -> IndexMap<Vec<String>, String> {
    NAMED_FOREIGN_KEY
        .captures_iter(sql)
        .map(|captures| {
            let columns = captures[2].split(',').map(unquote_identifier).collect();
            (columns, captures[1].replace("\"\"", "\""))
        })
        .collect()
}

/// Enum values of `CHECK ("column" IN (...))` constraints, keyed by column.
fn enum_values(sql: &str) -> IndexMap<String, Vec<String>> {
    ENUM_CHECK
        .captures_iter(sql)
        .map(|captures| {
            let values = ENUM_VALUE
                .captures_iter(&captures[2])
                .map(|value| value[1].replace("''", "'"))
                .collect();
            (captures[1].replace("\"\"", "\""), values)
        })
        .collect()
}

/// Interprets the default clause reported by `pragma_table_info`.
fn parse_default(raw: &str, column: &ColumnSchema) -> DefaultValue {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("NULL") {
        return DefaultValue::Null;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return DefaultValue::String(raw[1..raw.len() - 1].replace("''", "'"));
    }
    let boolean = column.abstract_type == Some(AbstractType::Boolean);
    if raw.eq_ignore_ascii_case("TRUE") || raw.eq_ignore_ascii_case("FALSE") {
        return DefaultValue::Bool(raw.eq_ignore_ascii_case("TRUE"));
    }
    if let Ok(i) = raw.parse::<i64>() {
        return if boolean {
            DefaultValue::Bool(i != 0)
        } else {
            DefaultValue::Integer(i)
        };
    }
    if let Ok(f) = raw.parse::<f64>() {
        return DefaultValue::Float(f);
    }
    DefaultValue::Expression(raw.to_string())
}
