//! Descriptor model.
//!
//! Value objects describing a single column, index or foreign key. They are
//! owned by a [`TableState`](crate::state::TableState) and compared
//! structurally by the [`Comparator`](crate::comparator::Comparator).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// Portable column type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AbstractType {
    /// Auto-incrementing 32-bit primary key.
    Primary,
    /// Auto-incrementing 64-bit primary key.
    BigPrimary,
    /// Boolean.
    Boolean,
    /// Integer (32-bit).
    Integer,
    /// Tiny integer (8-bit).
    TinyInteger,
    /// Small integer (16-bit).
    SmallInteger,
    /// Big integer (64-bit).
    BigInteger,
    /// Variable-length string with a size.
    String,
    /// Text.
    Text,
    /// Tiny text.
    TinyText,
    /// Long text.
    LongText,
    /// Double precision float.
    Double,
    /// Single precision float.
    Float,
    /// Decimal with precision and scale.
    Decimal,
    /// Date and time.
    Datetime,
    /// Date only.
    Date,
    /// Time only.
    Time,
    /// Timestamp.
    Timestamp,
    /// Binary large object.
    Binary,
    /// Tiny binary.
    TinyBinary,
    /// Long binary.
    LongBinary,
    /// JSON document.
    Json,
    /// UUID.
    Uuid,
    /// One of a fixed set of string values.
    Enum,
}

impl AbstractType {
    /// Looks up a type by its definition name (`string`, `bigPrimary`, ...).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name.to_ascii_lowercase().as_str() {
            "primary" => Self::Primary,
            "bigprimary" => Self::BigPrimary,
            "boolean" | "bool" => Self::Boolean,
            "integer" | "int" => Self::Integer,
            "tinyinteger" | "tinyint" => Self::TinyInteger,
            "smallinteger" | "smallint" => Self::SmallInteger,
            "biginteger" | "bigint" => Self::BigInteger,
            "string" | "varchar" => Self::String,
            "text" => Self::Text,
            "tinytext" => Self::TinyText,
            "longtext" => Self::LongText,
            "double" => Self::Double,
            "float" => Self::Float,
            "decimal" => Self::Decimal,
            "datetime" => Self::Datetime,
            "date" => Self::Date,
            "time" => Self::Time,
            "timestamp" => Self::Timestamp,
            "binary" => Self::Binary,
            "tinybinary" => Self::TinyBinary,
            "longbinary" => Self::LongBinary,
            "json" => Self::Json,
            "uuid" => Self::Uuid,
            "enum" => Self::Enum,
            _ => return None,
        };
        Some(ty)
    }

    /// Whether the database generates values for this type.
    #[must_use]
    pub fn is_auto_increment(self) -> bool {
        matches!(self, Self::Primary | Self::BigPrimary)
    }

    /// Whether this is a string-like type.
    #[must_use]
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            Self::String | Self::Text | Self::TinyText | Self::LongText
        )
    }
}

impl fmt::Display for AbstractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Primary => "primary",
            Self::BigPrimary => "bigPrimary",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::TinyInteger => "tinyInteger",
            Self::SmallInteger => "smallInteger",
            Self::BigInteger => "bigInteger",
            Self::String => "string",
            Self::Text => "text",
            Self::TinyText => "tinyText",
            Self::LongText => "longText",
            Self::Double => "double",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Datetime => "datetime",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::Binary => "binary",
            Self::TinyBinary => "tinyBinary",
            Self::LongBinary => "longBinary",
            Self::Json => "json",
            Self::Uuid => "uuid",
            Self::Enum => "enum",
        };
        f.write_str(name)
    }
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// No default value.
    #[default]
    None,
    /// NULL default.
    Null,
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String default.
    String(String),
    /// Database expression (e.g. `CURRENT_TIMESTAMP`), emitted verbatim.
    Expression(String),
}

impl DefaultValue {
    /// Returns the SQL representation of this default value.
    #[must_use]
    pub fn to_sql(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Null => Some("NULL".to_string()),
            Self::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(format!("{f:?}")),
            Self::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
            Self::Expression(expr) => Some(expr.clone()),
        }
    }

    /// Whether a default of any kind is set.
    #[must_use]
    pub fn is_some(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Compares two defaults. Expressions are never compared as literals:
    /// they match when their normalized text matches.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Expression(a), Self::Expression(b)) => {
                normalize_expression(a) == normalize_expression(b)
            }
            _ => self == other,
        }
    }
}

fn normalize_expression(expr: &str) -> String {
    expr.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    /// No action (error if referenced row is deleted/updated).
    #[default]
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }

    /// Parses an action as reported by database catalogs.
    #[must_use]
    pub fn from_sql(sql: &str) -> Self {
        match sql.trim().to_ascii_uppercase().as_str() {
            "RESTRICT" => Self::Restrict,
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            _ => Self::NoAction,
        }
    }
}

static TYPE_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z]+)\s*(?:\(\s*([^)]*?)\s*\))?\s*$").expect("valid type regex")
});

/// Schema definition for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Abstract type, `None` until a type is set.
    #[serde(rename = "type")]
    pub abstract_type: Option<AbstractType>,
    /// Size for sized types (string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    /// Precision for decimal types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    /// Scale for decimal types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u8>,
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Default value.
    #[serde(default)]
    pub default: DefaultValue,
    /// Allowed values for enum columns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

impl ColumnSchema {
    /// Creates a new untyped, NOT NULL column.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            abstract_type: None,
            size: None,
            precision: None,
            scale: None,
            nullable: false,
            default: DefaultValue::None,
            enum_values: Vec::new(),
        }
    }

    fn typed(&mut self, abstract_type: AbstractType) -> &mut Self {
        self.abstract_type = Some(abstract_type);
        self.size = None;
        self.precision = None;
        self.scale = None;
        self.enum_values.clear();
        self
    }

    /// Auto-incrementing primary key.
    pub fn primary(&mut self) -> &mut Self {
        self.typed(AbstractType::Primary)
    }

    /// Auto-incrementing 64-bit primary key.
    pub fn big_primary(&mut self) -> &mut Self {
        self.typed(AbstractType::BigPrimary)
    }

    /// Boolean column.
    pub fn boolean(&mut self) -> &mut Self {
        self.typed(AbstractType::Boolean)
    }

    /// Integer column.
    pub fn integer(&mut self) -> &mut Self {
        self.typed(AbstractType::Integer)
    }

    /// Tiny integer column.
    pub fn tiny_integer(&mut self) -> &mut Self {
        self.typed(AbstractType::TinyInteger)
    }

    /// Small integer column.
    pub fn small_integer(&mut self) -> &mut Self {
        self.typed(AbstractType::SmallInteger)
    }

    /// Big integer column.
    pub fn big_integer(&mut self) -> &mut Self {
        self.typed(AbstractType::BigInteger)
    }

    /// String column with a maximum size.
    pub fn string(&mut self, size: u32) -> &mut Self {
        self.typed(AbstractType::String);
        self.size = Some(size);
        self
    }

    /// Text column.
    pub fn text(&mut self) -> &mut Self {
        self.typed(AbstractType::Text)
    }

    /// Tiny text column.
    pub fn tiny_text(&mut self) -> &mut Self {
        self.typed(AbstractType::TinyText)
    }

    /// Long text column.
    pub fn long_text(&mut self) -> &mut Self {
        self.typed(AbstractType::LongText)
    }

    /// Double column.
    pub fn double(&mut self) -> &mut Self {
        self.typed(AbstractType::Double)
    }

    /// Float column.
    pub fn float(&mut self) -> &mut Self {
        self.typed(AbstractType::Float)
    }

    /// Decimal column.
    pub fn decimal(&mut self, precision: u8, scale: u8) -> &mut Self {
        self.typed(AbstractType::Decimal);
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Datetime column.
    pub fn datetime(&mut self) -> &mut Self {
        self.typed(AbstractType::Datetime)
    }

    /// Date column.
    pub fn date(&mut self) -> &mut Self {
        self.typed(AbstractType::Date)
    }

    /// Time column.
    pub fn time(&mut self) -> &mut Self {
        self.typed(AbstractType::Time)
    }

    /// Timestamp column.
    pub fn timestamp(&mut self) -> &mut Self {
        self.typed(AbstractType::Timestamp)
    }

    /// Binary column.
    pub fn binary(&mut self) -> &mut Self {
        self.typed(AbstractType::Binary)
    }

    /// Tiny binary column.
    pub fn tiny_binary(&mut self) -> &mut Self {
        self.typed(AbstractType::TinyBinary)
    }

    /// Long binary column.
    pub fn long_binary(&mut self) -> &mut Self {
        self.typed(AbstractType::LongBinary)
    }

    /// JSON column.
    pub fn json(&mut self) -> &mut Self {
        self.typed(AbstractType::Json)
    }

    /// UUID column.
    pub fn uuid(&mut self) -> &mut Self {
        self.typed(AbstractType::Uuid)
    }

    /// Enum column restricted to the given values.
    pub fn enumeration<I, S>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.typed(AbstractType::Enum);
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Sets nullability.
    pub fn nullable(&mut self, nullable: bool) -> &mut Self {
        self.nullable = nullable;
        self
    }

    /// Sets the default value.
    pub fn default_value(&mut self, value: DefaultValue) -> &mut Self {
        self.default = value;
        self
    }

    /// Sets the type from a definition string such as `string(32)`,
    /// `decimal(10, 2)` or `enum(draft, published)`.
    pub fn set_type(&mut self, definition: &str) -> Result<&mut Self> {
        let invalid = |reason: &str| SchemaError::InvalidColumnType {
            definition: definition.to_string(),
            reason: reason.to_string(),
        };

        let captures = TYPE_DEFINITION
            .captures(definition)
            .ok_or_else(|| invalid("expected `type` or `type(arguments)`"))?;
        let abstract_type = AbstractType::from_name(&captures[1])
            .ok_or_else(|| invalid("unknown type"))?;
        let args: Vec<&str> = captures
            .get(2)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        match abstract_type {
            AbstractType::String => {
                let size = match args.as_slice() {
                    [] => 255,
                    [size] => size.parse().map_err(|_| invalid("size must be a number"))?,
                    _ => return Err(invalid("string takes one argument")),
                };
                self.string(size);
            }
            AbstractType::Decimal => match args.as_slice() {
                [precision, scale] => {
                    let precision = precision
                        .parse()
                        .map_err(|_| invalid("precision must be a number"))?;
                    let scale = scale
                        .parse()
                        .map_err(|_| invalid("scale must be a number"))?;
                    if scale > precision {
                        return Err(invalid("scale exceeds precision"));
                    }
                    self.decimal(precision, scale);
                }
                _ => return Err(invalid("decimal takes precision and scale")),
            },
            AbstractType::Enum => {
                if args.is_empty() {
                    return Err(invalid("enum requires at least one value"));
                }
                let values: Vec<String> = args
                    .iter()
                    .map(|v| v.trim_matches(|c| c == '\'' || c == '"').to_string())
                    .collect();
                self.enumeration(values);
            }
            other => {
                if !args.is_empty() {
                    return Err(invalid("type takes no arguments"));
                }
                self.typed(other);
            }
        }

        Ok(self)
    }

    /// The default a non-nullable column receives so that adding it to a
    /// populated table does not fail.
    #[must_use]
    pub fn synthetic_default(&self) -> Option<DefaultValue> {
        let value = match self.abstract_type? {
            AbstractType::Primary
            | AbstractType::BigPrimary
            | AbstractType::Binary
            | AbstractType::TinyBinary
            | AbstractType::LongBinary
            | AbstractType::Json => return None,
            AbstractType::Boolean => DefaultValue::Bool(false),
            AbstractType::Integer
            | AbstractType::TinyInteger
            | AbstractType::SmallInteger
            | AbstractType::BigInteger => DefaultValue::Integer(0),
            AbstractType::Double | AbstractType::Float | AbstractType::Decimal => {
                DefaultValue::Float(0.0)
            }
            AbstractType::String
            | AbstractType::Text
            | AbstractType::TinyText
            | AbstractType::LongText
            | AbstractType::Uuid => DefaultValue::String(String::new()),
            AbstractType::Enum => DefaultValue::String(self.enum_values.first()?.clone()),
            AbstractType::Datetime | AbstractType::Timestamp => {
                DefaultValue::String("1970-01-01 00:00:00".to_string())
            }
            AbstractType::Date => DefaultValue::String("1970-01-01".to_string()),
            AbstractType::Time => DefaultValue::String("00:00:00".to_string()),
        };
        Some(value)
    }

    /// Structural comparison of every field.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.name == other.name
            && self.abstract_type == other.abstract_type
            && self.size == other.size
            && self.precision == other.precision
            && self.scale == other.scale
            && self.nullable == other.nullable
            && self.default.same_as(&other.default)
            && self.enum_values == other.enum_values
    }
}

/// Schema definition for an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Columns included in the index.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    pub unique: bool,
}

impl IndexSchema {
    /// Creates a non-unique index.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
        }
    }

    /// Sets uniqueness.
    pub fn unique(&mut self, unique: bool) -> &mut Self {
        self.unique = unique;
        self
    }

    /// Sets an explicit name.
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    /// Whether the index covers exactly these columns, in this order.
    #[must_use]
    pub fn covers(&self, columns: &[String]) -> bool {
        self.columns == columns
    }
}

/// Schema definition for a foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeySchema {
    /// Constraint name.
    pub name: String,
    /// Column(s) in the referencing table.
    pub columns: Vec<String>,
    /// Referenced table name, prefix included.
    pub foreign_table: String,
    /// Referenced column(s).
    pub foreign_columns: Vec<String>,
    /// Action on delete.
    pub on_delete: ForeignKeyAction,
    /// Action on update.
    pub on_update: ForeignKeyAction,
}

impl ForeignKeySchema {
    /// Creates a foreign key with no target yet.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            foreign_table: String::new(),
            foreign_columns: Vec::new(),
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
        }
    }

    /// Sets the referenced table and columns. The table name must already
    /// carry the database prefix; [`Table::foreign`](crate::table::Table::foreign)
    /// callers should use [`Table::references`](crate::table::Table::references).
    pub fn references<I, S>(&mut self, table: impl Into<String>, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.foreign_table = table.into();
        self.foreign_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the ON DELETE action.
    pub fn on_delete(&mut self, action: ForeignKeyAction) -> &mut Self {
        self.on_delete = action;
        self
    }

    /// Sets the ON UPDATE action.
    pub fn on_update(&mut self, action: ForeignKeyAction) -> &mut Self {
        self.on_update = action;
        self
    }

    /// Sets an explicit constraint name.
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }
}

/// Shortens an identifier that exceeds the dialect limit by hashing it.
#[must_use]
pub fn limit_identifier(name: String, max_length: usize) -> String {
    if name.len() <= max_length {
        return name;
    }
    let hash = blake3::hash(name.as_bytes()).to_hex();
    let keep = max_length.saturating_sub(1).min(hash.len());
    format!("h{}", &hash.as_str()[..keep])
}

/// Default name for an index over `columns` of `table`.
#[must_use]
pub fn index_name(table: &str, columns: &[String], max_length: usize) -> String {
    limit_identifier(
        format!("{}_index_{}", table, columns.join("_")),
        max_length,
    )
}

/// Default name for a foreign key over `columns` of `table`.
#[must_use]
pub fn foreign_key_name(table: &str, columns: &[String], max_length: usize) -> String {
    limit_identifier(
        format!("{}_foreign_{}_{}", table, columns.join("_"), unique_id()),
        max_length,
    )
}

/// Time-based unique suffix.
fn unique_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let now = chrono::Utc::now();
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed) & 0xfff;
    format!(
        "{:x}{:05x}{:03x}",
        now.timestamp(),
        now.timestamp_subsec_micros(),
        sequence
    )
}
