//! SQLite dialect.
//!
//! SQLite has limited ALTER TABLE support. Renames and added or dropped
//! columns are native; any other column change and every foreign key change
//! on an existing table goes through the "table recreation" strategy:
//! create a new table, copy data, drop the old table, rename the new table.

use std::sync::LazyLock;

use regex::Regex;

use crate::behavior::Behavior;
use crate::comparator::TableDiff;
use crate::error::{Result, SchemaError};
use crate::schema::{AbstractType, ColumnSchema};

use super::{Dialect, renamed_only};

static DECLARED_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([a-z ]+?)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?\s*$")
        .expect("valid declared type regex")
});

/// SQLite dialect.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Sets the type of `column` from a declared SQLite type such as
    /// `varchar(255)`. Unknown types fall back to text.
    pub fn parse_type(&self, declared: &str, column: &mut ColumnSchema) {
        let declared = declared.to_ascii_lowercase();
        let Some(captures) = DECLARED_TYPE.captures(&declared) else {
            column.text();
            return;
        };
        let first = captures.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        let second = captures.get(3).and_then(|m| m.as_str().parse::<u8>().ok());

        match &captures[1] {
            "integer" | "int" => column.integer(),
            "tinyint" => column.tiny_integer(),
            "smallint" => column.small_integer(),
            "bigint" => column.big_integer(),
            "boolean" | "bool" => column.boolean(),
            "varchar" | "character varying" | "char" | "character" => {
                column.string(first.unwrap_or(255))
            }
            "text" | "clob" => column.text(),
            "tinytext" => column.tiny_text(),
            "longtext" => column.long_text(),
            "double" | "double precision" | "real" => column.double(),
            "float" => column.float(),
            "numeric" | "decimal" => column.decimal(
                first.and_then(|p| u8::try_from(p).ok()).unwrap_or(10),
                second.unwrap_or(0),
            ),
            "datetime" => column.datetime(),
            "date" => column.date(),
            "time" => column.time(),
            "timestamp" => column.timestamp(),
            "blob" => column.binary(),
            "tinyblob" => column.tiny_binary(),
            "longblob" => column.long_binary(),
            "json" => column.json(),
            "uuid" => column.uuid(),
            other if other.contains("int") => column.integer(),
            _ => column.text(),
        };
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn type_name(&self, column: &ColumnSchema) -> String {
        let Some(abstract_type) = column.abstract_type else {
            return "text".to_string();
        };
        match abstract_type {
            AbstractType::Primary
            | AbstractType::BigPrimary
            | AbstractType::Integer => "integer".to_string(),
            AbstractType::TinyInteger => "tinyint".to_string(),
            AbstractType::SmallInteger => "smallint".to_string(),
            AbstractType::BigInteger => "bigint".to_string(),
            AbstractType::Boolean => "boolean".to_string(),
            AbstractType::String => format!("varchar({})", column.size.unwrap_or(255)),
            AbstractType::Text | AbstractType::Enum => "text".to_string(),
            AbstractType::TinyText => "tinytext".to_string(),
            AbstractType::LongText => "longtext".to_string(),
            AbstractType::Double => "double".to_string(),
            AbstractType::Float => "float".to_string(),
            AbstractType::Decimal => format!(
                "numeric({}, {})",
                column.precision.unwrap_or(10),
                column.scale.unwrap_or(0)
            ),
            AbstractType::Datetime => "datetime".to_string(),
            AbstractType::Date => "date".to_string(),
            AbstractType::Time => "time".to_string(),
            AbstractType::Timestamp => "timestamp".to_string(),
            AbstractType::Binary => "blob".to_string(),
            AbstractType::TinyBinary => "tinyblob".to_string(),
            AbstractType::LongBinary => "longblob".to_string(),
            AbstractType::Json => "json".to_string(),
            AbstractType::Uuid => "uuid".to_string(),
        }
    }

    fn auto_increment_keyword(&self) -> Option<&'static str> {
        Some("AUTOINCREMENT")
    }

    fn normalize_column(&self, column: &mut ColumnSchema) {
        // SQLite rowids are always 64-bit.
        if column.abstract_type == Some(AbstractType::BigPrimary) {
            column.abstract_type = Some(AbstractType::Primary);
        }
    }

    fn alter_column(
        &self,
        table: &str,
        current: &ColumnSchema,
        initial: &ColumnSchema,
    ) -> Result<Vec<String>> {
        if renamed_only(current, initial) {
            return Ok(vec![format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                self.quote_identifier(table),
                self.quote_identifier(&initial.name),
                self.quote_identifier(&current.name)
            )]);
        }
        Err(SchemaError::AlterColumnUnsupported {
            dialect: self.name(),
            table: table.to_string(),
            column: current.name.clone(),
        })
    }

    fn requires_rebuild(&self, diff: &TableDiff<'_>, behavior: Behavior) -> bool {
        let altered = behavior.contains(Behavior::ALTER_COLUMNS)
            && diff
                .altered_columns
                .iter()
                .any(|(current, initial)| !renamed_only(current, initial));
        let dropped =
            behavior.contains(Behavior::DROP_COLUMNS) && !diff.dropped_columns.is_empty();
        let foreign_keys = (behavior.contains(Behavior::CREATE_FOREIGNS)
            && !diff.added_foreign_keys.is_empty())
            || (behavior.contains(Behavior::DROP_FOREIGNS)
                && !diff.dropped_foreign_keys.is_empty())
            || (behavior.contains(Behavior::ALTER_FOREIGNS)
                && !diff.altered_foreign_keys.is_empty());

        altered || dropped || foreign_keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::Comparator;
    use crate::dialect::ColumnCopy;
    use crate::schema::{DefaultValue, ForeignKeySchema, IndexSchema};
    use crate::state::TableState;

    fn dialect() -> SqliteDialect {
        SqliteDialect::new()
    }

    fn users() -> TableState {
        let mut state = TableState::new("users", "");
        let mut id = ColumnSchema::new("id");
        id.primary();
        let mut name = ColumnSchema::new("name");
        name.string(255).default_value(DefaultValue::String(String::new()));
        state.add_column(id);
        state.add_column(name);
        state.primary_keys = vec!["id".to_string()];
        state
    }

    #[test]
    fn test_create_table_simple() {
        let sql = dialect().create_table(&users());
        assert_eq!(sql.len(), 1);
        assert_eq!(
            sql[0],
            "CREATE TABLE \"users\" (\n  \
             \"id\" integer PRIMARY KEY AUTOINCREMENT NOT NULL,\n  \
             \"name\" varchar(255) NOT NULL DEFAULT ''\n)"
        );
    }

    #[test]
    fn test_create_table_composite_key_and_foreign_key() {
        let mut state = TableState::new("memberships", "");
        for name in ["user_id", "team_id"] {
            let mut col = ColumnSchema::new(name);
            col.integer();
            state.add_column(col);
        }
        state.primary_keys = vec!["user_id".to_string(), "team_id".to_string()];
        let mut fk = ForeignKeySchema::new("memberships_team", vec!["team_id".to_string()]);
        fk.references("teams", ["id"]);
        state.add_foreign_key(fk);

        let sql = &dialect().create_table(&state)[0];
        assert!(sql.contains("PRIMARY KEY (\"user_id\", \"team_id\")"));
        assert!(sql.contains(
            "CONSTRAINT \"memberships_team\" FOREIGN KEY (\"team_id\") REFERENCES \"teams\" (\"id\") \
             ON DELETE NO ACTION ON UPDATE NO ACTION"
        ));
        assert!(!sql.contains("AUTOINCREMENT"));
    }

    #[test]
    fn test_add_column_with_default() {
        let mut column = ColumnSchema::new("is_active");
        column.boolean().default_value(DefaultValue::Bool(true));

        let sql = dialect().add_column("users", &column);
        assert_eq!(
            sql[0],
            "ALTER TABLE \"users\" ADD COLUMN \"is_active\" boolean NOT NULL DEFAULT 1"
        );
    }

    #[test]
    fn test_enum_column_has_check() {
        let mut column = ColumnSchema::new("status");
        column.enumeration(["draft", "published"]);

        let sql = dialect().column_definition("posts", &column, false);
        assert_eq!(
            sql,
            "\"status\" text NOT NULL CHECK (\"status\" IN ('draft', 'published'))"
        );
    }

    #[test]
    fn test_rename_only_alteration_is_native() {
        let mut initial = ColumnSchema::new("name");
        initial.string(255);
        let mut current = initial.clone();
        current.name = "full_name".to_string();

        let sql = dialect().alter_column("users", &current, &initial).unwrap();
        assert_eq!(
            sql[0],
            "ALTER TABLE \"users\" RENAME COLUMN \"name\" TO \"full_name\""
        );

        current.nullable(true);
        let err = dialect().alter_column("users", &current, &initial).unwrap_err();
        assert!(matches!(err, SchemaError::AlterColumnUnsupported { dialect: "sqlite", .. }));
    }

    #[test]
    fn test_requires_rebuild() {
        let initial = users();
        let mut current = initial.clone();
        current.column_mut("name").unwrap().nullable(true);
        let diff = Comparator::new(&initial, &current).diff();

        assert!(dialect().requires_rebuild(&diff, Behavior::ALL));
        assert!(!dialect().requires_rebuild(&diff, Behavior::ALL - Behavior::ALTER_COLUMNS));

        let mut renamed = initial.clone();
        renamed.rename_column("name", "full_name").unwrap();
        let diff = Comparator::new(&initial, &renamed).diff();
        assert!(!dialect().requires_rebuild(&diff, Behavior::ALL));
    }

    #[test]
    fn test_rebuild_table() {
        let initial = users();
        let mut target = initial.clone();
        target.column_mut("name").unwrap().nullable(false);
        target.add_index(IndexSchema::new("users_index_name", vec!["name".to_string()]));

        let mut source = initial.column("name").unwrap().clone();
        source.nullable(true);
        let copy = vec![
            ColumnCopy {
                target: target.column("id").unwrap(),
                source: initial.column("id").unwrap(),
            },
            ColumnCopy {
                target: target.column("name").unwrap(),
                source: &source,
            },
        ];

        let sql = dialect().rebuild_table("users", &target, &copy);
        assert_eq!(sql.len(), 5);
        assert!(sql[0].starts_with("CREATE TABLE \"users__rebuild\""));
        assert_eq!(
            sql[1],
            "INSERT INTO \"users__rebuild\" (\"id\", \"name\") \
             SELECT \"id\", COALESCE(\"name\", '') FROM \"users\""
        );
        assert_eq!(sql[2], "DROP TABLE \"users\"");
        assert_eq!(sql[3], "ALTER TABLE \"users__rebuild\" RENAME TO \"users\"");
        assert_eq!(
            sql[4],
            "CREATE INDEX \"users_index_name\" ON \"users\" (\"name\")"
        );
    }

    #[test]
    fn test_parse_declared_types() {
        let d = dialect();
        let mut column = ColumnSchema::new("x");

        d.parse_type("VARCHAR(64)", &mut column);
        assert_eq!(column.abstract_type, Some(AbstractType::String));
        assert_eq!(column.size, Some(64));

        d.parse_type("numeric(10, 2)", &mut column);
        assert_eq!(column.abstract_type, Some(AbstractType::Decimal));
        assert_eq!((column.precision, column.scale), (Some(10), Some(2)));

        d.parse_type("longblob", &mut column);
        assert_eq!(column.abstract_type, Some(AbstractType::LongBinary));

        d.parse_type("MEDIUMINT", &mut column);
        assert_eq!(column.abstract_type, Some(AbstractType::Integer));

        d.parse_type("", &mut column);
        assert_eq!(column.abstract_type, Some(AbstractType::Text));
    }

    #[test]
    fn test_type_names_round_trip() {
        let d = dialect();
        for definition in [
            "integer", "tinyInteger", "smallInteger", "bigInteger", "boolean", "string(32)",
            "text", "tinyText", "longText", "double", "float", "decimal(8, 3)", "datetime",
            "date", "time", "timestamp", "binary", "tinyBinary", "longBinary", "json", "uuid",
        ] {
            let mut declared = ColumnSchema::new("x");
            declared.set_type(definition).unwrap();
            let mut reflected = ColumnSchema::new("x");
            d.parse_type(&d.type_name(&declared), &mut reflected);
            assert_eq!(reflected, declared, "{definition} should round-trip");
        }
    }
}
