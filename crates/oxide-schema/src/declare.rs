//! JSON schema files.
//!
//! A schema file lists the desired tables. Loading one and applying it to a
//! [`Database`] yields table handles ready for [`Database::synchronize`]:
//!
//! ```json
//! { "tables": [ { "name": "posts", "primary_key": ["id"],
//!   "columns": [ { "name": "id", "type": "primary" },
//!                { "name": "title", "type": "string(255)" } ],
//!   "indexes": [ { "columns": ["title"], "unique": true } ] } ] }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};

use crate::database::Database;
use crate::error::{Result, SchemaError};
use crate::schema::{AbstractType, ColumnSchema, DefaultValue, ForeignKeyAction};
use crate::state::TableState;
use crate::table::Table;

/// A whole schema file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaFile {
    /// Declared tables, in file order.
    #[serde(default)]
    pub tables: Vec<TableDeclaration>,
}

/// Desired shape of one table. Names are given without the database prefix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDeclaration {
    /// Table name.
    pub name: String,
    /// Previous name of the table, renamed on save if it still exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
    /// Drop the table instead of declaring it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub drop: bool,
    /// Primary key columns. Defaults to the auto-increment columns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    /// Columns, in table order.
    #[serde(default)]
    pub columns: Vec<ColumnDeclaration>,
    /// Indexes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDeclaration>,
    /// Foreign keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyDeclaration>,
}

/// One column of a [`TableDeclaration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDeclaration {
    /// Column name.
    pub name: String,
    /// Type definition, e.g. `string(255)` or `enum(draft, published)`.
    #[serde(rename = "type")]
    pub column_type: String,
    /// Whether NULL is allowed.
    #[serde(default)]
    pub nullable: bool,
    /// JSON literal, or `{ "expression": "CURRENT_TIMESTAMP" }`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
    /// Previous name of the column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
}

/// One index of a [`TableDeclaration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDeclaration {
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index is unique.
    #[serde(default)]
    pub unique: bool,
    /// Index name. Derived from the table and columns when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One foreign key of a [`TableDeclaration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDeclaration {
    /// Local columns.
    pub columns: Vec<String>,
    /// Referenced table, without the database prefix.
    pub table: String,
    /// Referenced columns, matching `columns` one to one.
    pub references: Vec<String>,
    /// Action on delete of the referenced row.
    #[serde(default)]
    pub on_delete: ForeignKeyAction,
    /// Action on update of the referenced key.
    #[serde(default)]
    pub on_update: ForeignKeyAction,
    /// Constraint name. Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SchemaFile {
    /// Parses a schema file from JSON text.
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a schema file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::parse(&json)
    }

    /// Describes existing tables in schema file form.
    #[must_use]
    pub fn from_states<'a>(states: impl IntoIterator<Item = &'a TableState>) -> Self {
        Self {
            tables: states
                .into_iter()
                .map(TableDeclaration::from_state)
                .collect(),
        }
    }

    /// Serializes to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Loads every declared table from `database` and applies its
    /// declaration.
    pub async fn tables(&self, database: &Database) -> Result<Vec<Table>> {
        let mut tables = Vec::with_capacity(self.tables.len());
        for declaration in &self.tables {
            let mut table = database.table(&declaration.name).await?;
            if !table.exists() {
                if let Some(from) = &declaration.renamed_from {
                    let previous = database.table(from).await?;
                    if previous.exists() {
                        table = previous;
                        table.rename(&declaration.name);
                    }
                }
            }
            declaration.apply(&mut table)?;
            tables.push(table);
        }
        Ok(tables)
    }
}

impl TableDeclaration {
    /// Declares everything listed here on `table`.
    pub fn apply(&self, table: &mut Table) -> Result<()> {
        if self.drop {
            table.drop();
            return Ok(());
        }

        for column in &self.columns {
            if let Some(from) = &column.renamed_from {
                if !table.state().has_column(&column.name) && table.state().has_column(from) {
                    table.rename_column(from, &column.name)?;
                }
            }
            let default = column.default.as_ref().map(default_from_json).transpose()?;
            let schema = table.column(&column.name);
            schema.set_type(&column.column_type)?.nullable(column.nullable);
            if let Some(default) = default {
                schema.default_value(default);
            }
        }

        if !self.primary_key.is_empty() {
            let columns: Vec<&str> = self.primary_key.iter().map(String::as_str).collect();
            table.set_primary_keys(&columns)?;
        }

        for index in &self.indexes {
            let columns: Vec<&str> = index.columns.iter().map(String::as_str).collect();
            let schema = table.index(&columns);
            schema.unique(index.unique);
            if let Some(name) = &index.name {
                schema.name(name.as_str());
            }
        }

        for fk in &self.foreign_keys {
            let columns: Vec<&str> = fk.columns.iter().map(String::as_str).collect();
            let references: Vec<&str> = fk.references.iter().map(String::as_str).collect();
            let schema = table.references(&columns, &fk.table, &references);
            schema.on_delete(fk.on_delete).on_update(fk.on_update);
            if let Some(name) = &fk.name {
                schema.name(name.as_str());
            }
        }
        Ok(())
    }

    /// Describes an existing table. Names of indexes and foreign keys are
    /// kept so that applying the result back changes nothing.
    #[must_use]
    pub fn from_state(state: &TableState) -> Self {
        let strip = |name: &str| {
            name.strip_prefix(&state.prefix)
                .unwrap_or(name)
                .to_string()
        };
        Self {
            name: state.short_name().to_string(),
            renamed_from: None,
            drop: false,
            primary_key: state.primary_keys.clone(),
            columns: state
                .columns
                .values()
                .map(|column| ColumnDeclaration {
                    name: column.name.clone(),
                    column_type: type_definition(column),
                    nullable: column.nullable,
                    default: default_to_json(&column.default),
                    renamed_from: None,
                })
                .collect(),
            indexes: state
                .indexes
                .values()
                .map(|index| IndexDeclaration {
                    columns: index.columns.clone(),
                    unique: index.unique,
                    name: Some(index.name.clone()),
                })
                .collect(),
            foreign_keys: state
                .foreign_keys
                .values()
                .map(|fk| ForeignKeyDeclaration {
                    columns: fk.columns.clone(),
                    table: strip(&fk.foreign_table),
                    references: fk.foreign_columns.clone(),
                    on_delete: fk.on_delete,
                    on_update: fk.on_update,
                    name: Some(fk.name.clone()),
                })
                .collect(),
        }
    }
}

fn type_definition(column: &ColumnSchema) -> String {
    match column.abstract_type {
        None => String::new(),
        Some(AbstractType::String) => format!("string({})", column.size.unwrap_or(255)),
        Some(AbstractType::Decimal) => format!(
            "decimal({}, {})",
            column.precision.unwrap_or(10),
            column.scale.unwrap_or(0)
        ),
        Some(AbstractType::Enum) => format!("enum({})", column.enum_values.join(", ")),
        Some(other) => other.to_string(),
    }
}

fn default_from_json(value: &JsonValue) -> Result<DefaultValue> {
    let invalid = || SchemaError::InvalidDeclaration(format!("Unsupported default value: {value}"));
    Ok(match value {
        JsonValue::Null => DefaultValue::Null,
        JsonValue::Bool(b) => DefaultValue::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => DefaultValue::Integer(i),
            None => DefaultValue::Float(n.as_f64().ok_or_else(invalid)?),
        },
        JsonValue::String(s) => DefaultValue::String(s.clone()),
        JsonValue::Object(map) => match (map.len(), map.get("expression")) {
            (1, Some(JsonValue::String(expr))) => DefaultValue::Expression(expr.clone()),
            _ => return Err(invalid()),
        },
        JsonValue::Array(_) => return Err(invalid()),
    })
}

fn default_to_json(value: &DefaultValue) -> Option<JsonValue> {
    match value {
        DefaultValue::None => None,
        DefaultValue::Null => Some(JsonValue::Null),
        DefaultValue::Bool(b) => Some(JsonValue::Bool(*b)),
        DefaultValue::Integer(i) => Some(JsonValue::from(*i)),
        DefaultValue::Float(f) => Number::from_f64(*f).map(JsonValue::Number),
        DefaultValue::String(s) => Some(JsonValue::String(s.clone())),
        DefaultValue::Expression(expr) => {
            let mut map = Map::new();
            map.insert("expression".to_string(), JsonValue::String(expr.clone()));
            Some(JsonValue::Object(map))
        }
    }
}
