//! PostgreSQL dialect.

use crate::error::Result;
use crate::schema::{AbstractType, ColumnSchema, DefaultValue, IndexSchema};

use super::{Dialect, enum_list};

/// PostgreSQL dialect.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// CHECK constraint names are scoped to their table, so the name only
    /// carries the column and survives table renames.
    fn enum_constraint(column: &str) -> String {
        format!("{column}_enum")
    }

    /// Column type usable in `ALTER COLUMN .. TYPE`.
    fn storage_type(&self, column: &ColumnSchema) -> String {
        match column.abstract_type {
            Some(AbstractType::Primary) => "integer".to_string(),
            Some(AbstractType::BigPrimary) => "bigint".to_string(),
            _ => self.type_name(column),
        }
    }

    fn alter(&self, table: &str, column: &str, action: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {}",
            self.quote_identifier(table),
            self.quote_identifier(column),
            action
        )
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn type_name(&self, column: &ColumnSchema) -> String {
        let Some(abstract_type) = column.abstract_type else {
            return "text".to_string();
        };
        match abstract_type {
            AbstractType::Primary => "serial".to_string(),
            AbstractType::BigPrimary => "bigserial".to_string(),
            AbstractType::Boolean => "boolean".to_string(),
            AbstractType::Integer => "integer".to_string(),
            AbstractType::TinyInteger | AbstractType::SmallInteger => "smallint".to_string(),
            AbstractType::BigInteger => "bigint".to_string(),
            AbstractType::String => {
                format!("character varying({})", column.size.unwrap_or(255))
            }
            AbstractType::Text | AbstractType::TinyText | AbstractType::LongText => {
                "text".to_string()
            }
            AbstractType::Double => "double precision".to_string(),
            AbstractType::Float => "real".to_string(),
            AbstractType::Decimal => format!(
                "numeric({}, {})",
                column.precision.unwrap_or(10),
                column.scale.unwrap_or(0)
            ),
            AbstractType::Datetime | AbstractType::Timestamp => {
                "timestamp without time zone".to_string()
            }
            AbstractType::Date => "date".to_string(),
            AbstractType::Time => "time without time zone".to_string(),
            AbstractType::Binary | AbstractType::TinyBinary | AbstractType::LongBinary => {
                "bytea".to_string()
            }
            AbstractType::Json => "json".to_string(),
            AbstractType::Uuid => "uuid".to_string(),
            AbstractType::Enum => {
                let size = column.enum_values.iter().map(String::len).max().unwrap_or(1);
                format!("character varying({size})")
            }
        }
    }

    fn default_sql(&self, value: &DefaultValue) -> Option<String> {
        match value {
            DefaultValue::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
            other => other.to_sql(),
        }
    }

    fn enum_check(&self, _table: &str, column: &ColumnSchema) -> Option<String> {
        if column.abstract_type != Some(AbstractType::Enum) {
            return None;
        }
        Some(format!(
            "CONSTRAINT {} CHECK ({} IN ({}))",
            self.quote_identifier(&Self::enum_constraint(&column.name)),
            self.quote_identifier(&column.name),
            enum_list(&column.enum_values)
        ))
    }

    fn alter_column(
        &self,
        table: &str,
        current: &ColumnSchema,
        initial: &ColumnSchema,
    ) -> Result<Vec<String>> {
        let quoted_table = self.quote_identifier(table);
        let name = current.name.as_str();
        let mut statements = Vec::new();

        if current.name != initial.name {
            statements.push(format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                quoted_table,
                self.quote_identifier(&initial.name),
                self.quote_identifier(name)
            ));
        }

        let was_enum = initial.abstract_type == Some(AbstractType::Enum);
        let is_enum = current.abstract_type == Some(AbstractType::Enum);
        let enum_changed = (was_enum || is_enum)
            && (was_enum != is_enum
                || current.enum_values != initial.enum_values
                || current.name != initial.name);

        if was_enum && enum_changed {
            statements.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                quoted_table,
                self.quote_identifier(&Self::enum_constraint(&initial.name))
            ));
        }

        let storage = self.storage_type(current);
        if storage != self.storage_type(initial) {
            statements.push(self.alter(
                table,
                name,
                &format!(
                    "TYPE {storage} USING {}::{storage}",
                    self.quote_identifier(name)
                ),
            ));
        }

        if !current.default.same_as(&initial.default) {
            let action = match self.default_sql(&current.default) {
                Some(default_sql) => format!("SET DEFAULT {default_sql}"),
                None => "DROP DEFAULT".to_string(),
            };
            statements.push(self.alter(table, name, &action));
        }

        if current.nullable != initial.nullable {
            if current.nullable {
                statements.push(self.alter(table, name, "DROP NOT NULL"));
            } else {
                if let Some(default_sql) = self.default_sql(&current.default) {
                    statements.push(format!(
                        "UPDATE {} SET {} = {} WHERE {} IS NULL",
                        quoted_table,
                        self.quote_identifier(name),
                        default_sql,
                        self.quote_identifier(name)
                    ));
                }
                statements.push(self.alter(table, name, "SET NOT NULL"));
            }
        }

        if is_enum && enum_changed {
            if let Some(check) = self.enum_check(table, current) {
                statements.push(format!("ALTER TABLE {quoted_table} ADD {check}"));
            }
        }

        Ok(statements)
    }

    fn alter_index(&self, table: &str, current: &IndexSchema, initial: &IndexSchema) -> Vec<String> {
        if current.columns == initial.columns && current.unique == initial.unique {
            return vec![format!(
                "ALTER INDEX {} RENAME TO {}",
                self.quote_identifier(&initial.name),
                self.quote_identifier(&current.name)
            )];
        }
        let mut statements = self.drop_index(table, initial);
        statements.extend(self.create_index(table, current));
        statements
    }
}
