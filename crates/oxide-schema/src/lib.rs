//! Declarative schema synchronization for SQL databases.
//!
//! `oxide-schema` keeps a live database in line with a schema declared in
//! code or in a JSON file. Instead of writing migrations, you describe the
//! tables you want; the engine reflects what exists, diffs the two and runs
//! the DDL that closes the gap:
//! - Each table keeps a shadow snapshot of what the database holds, so a
//!   second save with the same declaration does nothing
//! - Destructive changes are opt-in and staged across tables (foreign keys,
//!   then indexes, then columns)
//! - SQL generation is dialect-aware (SQLite, PostgreSQL)
//!
//! # Architecture
//!
//! - **State** - [`TableState`](state::TableState) with column, index and
//!   foreign key descriptors
//! - **Comparator** - Diffs the declared state against the shadow snapshot
//! - **Handler** - Turns a diff into ordered DDL, gated by a
//!   [`Behavior`](behavior::Behavior) mask
//! - **Bus** - Saves several tables across connections, all or nothing
//! - **Dialect** - Database-specific SQL generation
//! - **Reflect** - Reads existing tables back into a `TableState`
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_schema::prelude::*;
//!
//! let db = Database::sqlite("sqlite:blog.sqlite3").await?;
//!
//! let mut posts = db.table("posts").await?;
//! posts.column("id").primary();
//! posts.column("title").string(255);
//! posts.column("published").boolean().default_value(DefaultValue::Bool(false));
//! posts.index(&["title"]).unique(true);
//!
//! let mut comments = db.table("comments").await?;
//! comments.column("id").primary();
//! comments.column("post_id").integer();
//! comments
//!     .references(&["post_id"], "posts", &["id"])
//!     .on_delete(ForeignKeyAction::Cascade);
//!
//! db.synchronize(&mut [posts, comments]).await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Print the reflected schema as JSON
//! oxide-schema inspect
//!
//! # Show the DDL a schema file would run
//! oxide-schema plan schema.json
//!
//! # Apply a schema file, dropping what it does not declare
//! oxide-schema sync schema.json --drop-undeclared
//! ```

pub mod behavior;
pub mod bus;
pub mod comparator;
pub mod database;
pub mod declare;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod handler;
pub mod reflect;
pub mod schema;
pub mod sorter;
pub mod state;
pub mod table;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::behavior::Behavior;
    pub use crate::bus::{Bus, synchronize};
    pub use crate::comparator::{Comparator, TableDiff};
    pub use crate::database::Database;
    pub use crate::declare::SchemaFile;
    pub use crate::dialect::{Dialect, PostgresDialect, SqliteDialect};
    pub use crate::driver::{Connection, RecordingConnection, SqliteConnection, Value};
    pub use crate::error::{Result, SchemaError};
    pub use crate::handler::{Handler, SyncOutcome};
    pub use crate::reflect::{SchemaReflector, SqliteReflector};
    pub use crate::schema::{
        AbstractType, ColumnSchema, DefaultValue, ForeignKeyAction, ForeignKeySchema,
        IndexSchema,
    };
    pub use crate::sorter::DependencySorter;
    pub use crate::state::TableState;
    pub use crate::table::{DropUndeclared, Table};
}
