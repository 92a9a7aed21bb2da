//! DDL executor.
//!
//! The [`Handler`] walks the diff of one table and executes the DDL that
//! reconciles the database with the declared state, in a fixed order:
//!
//! 1. rename the table
//! 2. drop foreign keys, indexes, columns
//! 3. create then alter columns
//! 4. create then alter indexes
//! 5. create then alter foreign keys
//!
//! Which steps run is decided by a [`Behavior`] mask. Transactions are the
//! caller's concern.

use tracing::{debug, info};

use crate::behavior::Behavior;
use crate::comparator::{Comparator, TableDiff};
use crate::dialect::{ColumnCopy, Dialect};
use crate::driver::Connection;
use crate::error::{Result, SchemaError};
use crate::state::TableState;
use crate::table::Table;

/// What a [`Handler::sync`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// The table was created.
    pub created: bool,
    /// The table was dropped.
    pub dropped: bool,
    /// The table was rebuilt instead of altered.
    pub rebuilt: bool,
    /// Executed statements, in order.
    pub statements: Vec<String>,
}

/// Executes schema changes for one table.
pub struct Handler<'a> {
    dialect: &'a dyn Dialect,
    connection: &'a dyn Connection,
}

impl<'a> Handler<'a> {
    /// Creates a new handler.
    pub fn new(dialect: &'a dyn Dialect, connection: &'a dyn Connection) -> Self {
        Self {
            dialect,
            connection,
        }
    }

    /// Synchronizes a prepared table with the database.
    pub async fn sync(&self, table: &Table, behavior: Behavior) -> Result<SyncOutcome> {
        let initial = table.initial();
        let current = table.state();
        let mut outcome = SyncOutcome::default();

        if table.is_drop_pending() {
            if table.exists() && behavior.contains(Behavior::DROP) {
                info!(table = %initial.name, "Dropping table");
                self.run(&initial.name, self.dialect.drop_table(&initial.name), &mut outcome)
                    .await?;
                outcome.dropped = true;
            }
            return Ok(outcome);
        }

        if !table.exists() {
            if behavior.contains(Behavior::CREATE_COLUMNS) {
                self.create(current, behavior, &mut outcome).await?;
            }
            return Ok(outcome);
        }

        let diff = Comparator::new(initial, current).diff();

        if self.dialect.requires_rebuild(&diff, behavior) {
            self.rebuild(initial, current, behavior, &mut outcome).await?;
            return Ok(outcome);
        }

        let name = if diff.renamed && behavior.contains(Behavior::RENAME) {
            info!(from = %initial.name, to = %current.name, "Renaming table");
            self.run(
                &current.name,
                self.dialect.rename_table(&initial.name, &current.name),
                &mut outcome,
            )
            .await?;
            current.name.as_str()
        } else {
            initial.name.as_str()
        };

        self.alter(name, &diff, behavior, &mut outcome).await?;
        Ok(outcome)
    }

    async fn create(
        &self,
        state: &TableState,
        behavior: Behavior,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        info!(table = %state.name, columns = state.columns.len(), "Creating table");
        self.run(&state.name, self.dialect.create_table(state), outcome)
            .await?;

        if behavior.contains(Behavior::CREATE_INDEXES) {
            for index in state.indexes.values() {
                info!(table = %state.name, index = %index.name, "Creating index");
                self.run(&state.name, self.dialect.create_index(&state.name, index), outcome)
                    .await?;
            }
        }
        outcome.created = true;
        Ok(())
    }

    async fn rebuild(
        &self,
        initial: &TableState,
        current: &TableState,
        behavior: Behavior,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        let target = target_state(initial, current, behavior);
        let renames = behavior.contains(Behavior::ALTER_COLUMNS);

        let copy: Vec<ColumnCopy<'_>> = target
            .columns
            .values()
            .filter_map(|column| {
                let source = if renames {
                    if current.is_renamed_away(&column.name) {
                        return None;
                    }
                    current.column_origin(&column.name)
                } else {
                    column.name.as_str()
                };
                initial.column(source).map(|source| ColumnCopy {
                    target: column,
                    source,
                })
            })
            .collect();

        info!(
            table = %initial.name,
            target = %target.name,
            copied = copy.len(),
            "Rebuilding table"
        );
        self.run(
            &target.name,
            self.dialect.rebuild_table(&initial.name, &target, &copy),
            outcome,
        )
        .await?;
        outcome.rebuilt = true;
        Ok(())
    }

    async fn alter(
        &self,
        table: &str,
        diff: &TableDiff<'_>,
        behavior: Behavior,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        let dialect = self.dialect;

        if behavior.contains(Behavior::DROP_FOREIGNS) {
            for fk in &diff.dropped_foreign_keys {
                info!(table, foreign_key = %fk.name, "Dropping foreign key");
                self.run(table, dialect.drop_foreign_key(table, fk), outcome).await?;
            }
        }

        if behavior.contains(Behavior::DROP_INDEXES) {
            for index in &diff.dropped_indexes {
                info!(table, index = %index.name, "Dropping index");
                self.run(table, dialect.drop_index(table, index), outcome).await?;
            }
        }

        if behavior.contains(Behavior::DROP_COLUMNS) {
            for column in &diff.dropped_columns {
                info!(table, column = %column.name, "Dropping column");
                self.run(table, dialect.drop_column(table, column), outcome).await?;
            }
        }

        if behavior.contains(Behavior::CREATE_COLUMNS) {
            for column in &diff.added_columns {
                info!(table, column = %column.name, "Adding column");
                self.run(table, dialect.add_column(table, column), outcome).await?;
            }
        }

        if behavior.contains(Behavior::ALTER_COLUMNS) {
            for (current, initial) in &diff.altered_columns {
                info!(table, column = %current.name, from = %initial.name, "Altering column");
                let statements = dialect.alter_column(table, current, initial)?;
                self.run(table, statements, outcome).await?;
            }
        }

        if behavior.contains(Behavior::CREATE_INDEXES) {
            for index in &diff.added_indexes {
                info!(table, index = %index.name, "Creating index");
                self.run(table, dialect.create_index(table, index), outcome).await?;
            }
        }

        if behavior.contains(Behavior::ALTER_INDEXES) {
            for (current, initial) in &diff.altered_indexes {
                info!(table, index = %current.name, "Altering index");
                self.run(table, dialect.alter_index(table, current, initial), outcome)
                    .await?;
            }
        }

        if behavior.contains(Behavior::CREATE_FOREIGNS) {
            for fk in &diff.added_foreign_keys {
                info!(table, foreign_key = %fk.name, "Creating foreign key");
                self.run(table, dialect.add_foreign_key(table, fk), outcome).await?;
            }
        }

        if behavior.contains(Behavior::ALTER_FOREIGNS) {
            for (current, initial) in &diff.altered_foreign_keys {
                info!(table, foreign_key = %current.name, "Altering foreign key");
                self.run(table, dialect.alter_foreign_key(table, current, initial), outcome)
                    .await?;
            }
        }

        Ok(())
    }

    async fn run(
        &self,
        table: &str,
        statements: Vec<String>,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        for sql in statements {
            debug!(connection = %self.connection.name(), sql = %sql, "Executing SQL");
            if let Err(source) = self.connection.execute(&sql, &[]).await {
                return Err(SchemaError::Statement {
                    table: table.to_string(),
                    statement: sql,
                    source,
                });
            }
            outcome.statements.push(sql);
        }
        Ok(())
    }
}

/// The state the database holds after applying the changes between
/// `initial` and `current` that `behavior` allows.
#[must_use]
pub fn target_state(initial: &TableState, current: &TableState, behavior: Behavior) -> TableState {
    let mut target = if behavior.contains(Behavior::ALL) {
        current.clone()
    } else {
        partially_applied(initial, current, behavior)
    };
    target.clear_column_renames();
    target.clear_index_renames();
    target
}

fn partially_applied(initial: &TableState, current: &TableState, behavior: Behavior) -> TableState {
    let diff = Comparator::new(initial, current).diff();
    let mut target = initial.clone();

    if behavior.contains(Behavior::RENAME) {
        target.name.clone_from(&current.name);
    }
    if behavior.contains(Behavior::DROP_FOREIGNS) {
        for fk in &diff.dropped_foreign_keys {
            target.remove_foreign_key(&fk.name);
        }
    }
    if behavior.contains(Behavior::DROP_INDEXES) {
        for index in &diff.dropped_indexes {
            target.remove_index(&index.name);
        }
    }
    if behavior.contains(Behavior::DROP_COLUMNS) {
        for column in &diff.dropped_columns {
            target.remove_column(&column.name);
        }
    }
    if behavior.contains(Behavior::ALTER_COLUMNS) {
        for (new, old) in current.column_renames() {
            // A rename whose source is gone or whose target is taken is left
            // for a later pass.
            if let Err(err) = target.rename_column(old, new) {
                debug!(table = %target.name, from = old, to = new, error = %err, "Column rename not applied");
            }
        }
        for (column, _) in &diff.altered_columns {
            target.add_column((*column).clone());
        }
    }
    if behavior.contains(Behavior::CREATE_COLUMNS) {
        for column in &diff.added_columns {
            target.add_column((*column).clone());
        }
    }
    if behavior.contains(Behavior::CREATE_INDEXES) {
        for index in &diff.added_indexes {
            target.add_index((*index).clone());
        }
    }
    if behavior.contains(Behavior::ALTER_INDEXES) {
        for (index, previous) in &diff.altered_indexes {
            target.remove_index(&previous.name);
            target.add_index((*index).clone());
        }
    }
    if behavior.contains(Behavior::CREATE_FOREIGNS) {
        for fk in &diff.added_foreign_keys {
            target.add_foreign_key((*fk).clone());
        }
    }
    if behavior.contains(Behavior::ALTER_FOREIGNS) {
        for (fk, _) in &diff.altered_foreign_keys {
            target.add_foreign_key((*fk).clone());
        }
    }
    target
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dialect::PostgresDialect;
    use crate::driver::RecordingConnection;
    use crate::schema::{ColumnSchema, ForeignKeyAction, ForeignKeySchema, IndexSchema};

    fn posts() -> TableState {
        let mut state = TableState::new("posts", "");
        let mut id = ColumnSchema::new("id");
        id.primary();
        let mut title = ColumnSchema::new("title");
        title.string(255);
        let mut author = ColumnSchema::new("author_id");
        author.integer();
        state.add_column(id);
        state.add_column(title);
        state.add_column(author);
        state.primary_keys = vec!["id".to_string()];
        state.add_index(IndexSchema::new("posts_index_title", vec!["title".to_string()]));
        let mut fk = ForeignKeySchema::new("posts_author", vec!["author_id".to_string()]);
        fk.references("users", ["id"]);
        state.add_foreign_key(fk);
        state
    }

    #[test]
    fn test_target_state_for_all_is_current() {
        let initial = posts();
        let mut current = initial.clone();
        current.rename_column("title", "headline").unwrap();

        let target = target_state(&initial, &current, Behavior::ALL);
        assert!(target.has_column("headline"));
        assert_eq!(target.column_origin("headline"), "headline");
    }

    #[test]
    fn test_target_state_applies_allowed_categories_only() {
        let initial = posts();
        let mut current = initial.clone();
        current.remove_foreign_key("posts_author");
        current.remove_index("posts_index_title");
        let mut body = ColumnSchema::new("body");
        body.text();
        current.add_column(body);

        let target = target_state(&initial, &current, Behavior::DROP_FOREIGNS);
        assert!(target.foreign_keys.is_empty());
        assert!(target.index("posts_index_title").is_some());
        assert!(!target.has_column("body"));

        let target = target_state(
            &initial,
            &current,
            Behavior::DROP_FOREIGNS | Behavior::DROP_INDEXES | Behavior::CREATE_COLUMNS,
        );
        assert!(target.indexes.is_empty());
        assert!(target.has_column("body"));
    }

    #[test]
    fn test_target_state_applies_column_renames() {
        let initial = posts();
        let mut current = initial.clone();
        current.rename_column("title", "headline").unwrap();
        current.column_mut("headline").unwrap().nullable(true);

        let target = target_state(&initial, &current, Behavior::ALTER_COLUMNS);
        let names: Vec<&str> = target.columns.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["id", "headline", "author_id"]);
        assert!(target.column("headline").unwrap().nullable);
        assert_eq!(target.index("posts_index_title").unwrap().columns, vec!["headline"]);

        let untouched = target_state(&initial, &current, Behavior::CREATE_COLUMNS);
        assert!(untouched.has_column("title"));
    }

    /// Dialect with nothing but the required methods.
    #[derive(Debug)]
    struct BareDialect;

    impl Dialect for BareDialect {
        fn name(&self) -> &'static str {
            "bare"
        }

        fn type_name(&self, _column: &ColumnSchema) -> String {
            "text".to_string()
        }
    }

    fn column(name: &str) -> ColumnSchema {
        let mut column = ColumnSchema::new(name);
        column.integer();
        column
    }

    /// `posts` with two foreign keys, each backed by an index, and a column
    /// nothing uses.
    fn reflected_posts(connection: &Arc<RecordingConnection>, dialect: Arc<dyn Dialect>) -> Table {
        let mut state = posts();
        state.add_column(column("editor_id"));
        let mut legacy = ColumnSchema::new("legacy");
        legacy.text();
        state.add_column(legacy);
        state.add_index(IndexSchema::new("posts_index_author_id", vec!["author_id".to_string()]));
        state.add_index(IndexSchema::new("posts_index_editor_id", vec!["editor_id".to_string()]));
        let mut editor = ForeignKeySchema::new("posts_editor", vec!["editor_id".to_string()]);
        editor.references("users", ["id"]);
        state.add_foreign_key(editor);

        Table::reflected(Arc::clone(connection) as Arc<dyn Connection>, dialect, state)
    }

    #[tokio::test]
    async fn test_sync_runs_steps_in_fixed_order() {
        let conn = Arc::new(RecordingConnection::new("test"));
        let dialect = PostgresDialect::new();
        let mut table = reflected_posts(&conn, Arc::new(dialect.clone()));

        table.drop_foreign(&["editor_id"]).unwrap();
        table.drop_index(&["editor_id"]).unwrap();
        table.drop_column("legacy").unwrap();
        table.column("body").text().nullable(true);
        table.column("title").nullable(true);
        table.index(&["body"]);
        table.rename_index(&["title"], "posts_by_title").unwrap();
        table.references(&["body"], "documents", &["slug"]);
        table
            .foreign(&["author_id"])
            .on_delete(ForeignKeyAction::Cascade);

        let outcome = Handler::new(&dialect, conn.as_ref())
            .sync(&table, Behavior::ALL)
            .await
            .unwrap();
        assert_eq!(outcome.statements, conn.statements());

        let sql = outcome.statements;
        assert_eq!(sql.len(), 10, "{sql:#?}");
        assert_eq!(sql[0], "ALTER TABLE \"posts\" DROP CONSTRAINT \"posts_editor\"");
        assert_eq!(sql[1], "DROP INDEX \"posts_index_editor_id\"");
        assert_eq!(sql[2], "ALTER TABLE \"posts\" DROP COLUMN \"legacy\"");
        assert!(sql[3].starts_with("ALTER TABLE \"posts\" ADD COLUMN \"body\" text"));
        assert_eq!(sql[4], "ALTER TABLE \"posts\" ALTER COLUMN \"title\" DROP NOT NULL");
        assert_eq!(sql[5], "CREATE INDEX \"posts_index_body\" ON \"posts\" (\"body\")");
        assert_eq!(
            sql[6],
            "ALTER INDEX \"posts_index_title\" RENAME TO \"posts_by_title\""
        );
        assert!(sql[7].starts_with("ALTER TABLE \"posts\" ADD CONSTRAINT \"posts_foreign_body_"));
        assert!(sql[7].contains("REFERENCES \"documents\" (\"slug\")"));
        assert_eq!(sql[8], "ALTER TABLE \"posts\" DROP CONSTRAINT \"posts_author\"");
        assert!(sql[9].starts_with("ALTER TABLE \"posts\" ADD CONSTRAINT \"posts_author\""));
        assert!(sql[9].contains("ON DELETE CASCADE"));
    }

    #[tokio::test]
    async fn test_sync_skips_steps_outside_behavior() {
        let conn = Arc::new(RecordingConnection::new("test"));
        let dialect = PostgresDialect::new();
        let mut table = reflected_posts(&conn, Arc::new(dialect.clone()));
        table.drop_foreign(&["editor_id"]).unwrap();
        table.drop_column("legacy").unwrap();
        table.column("body").text().nullable(true);

        let outcome = Handler::new(&dialect, conn.as_ref())
            .sync(&table, Behavior::DROP_FOREIGNS | Behavior::CREATE_COLUMNS)
            .await
            .unwrap();
        assert_eq!(outcome.statements.len(), 2);
        assert_eq!(
            outcome.statements[0],
            "ALTER TABLE \"posts\" DROP CONSTRAINT \"posts_editor\""
        );
        assert!(outcome.statements[1].contains("ADD COLUMN \"body\""));
    }

    #[tokio::test]
    async fn test_alter_column_without_dialect_support_fails() {
        let conn = Arc::new(RecordingConnection::new("test"));
        let dialect = BareDialect;
        let mut table = reflected_posts(&conn, Arc::new(BareDialect));
        table.column("title").nullable(true);

        let err = Handler::new(&dialect, conn.as_ref())
            .sync(&table, Behavior::ALL)
            .await
            .unwrap_err();
        match err {
            SchemaError::AlterColumnUnsupported {
                dialect,
                table,
                column,
            } => {
                assert_eq!(dialect, "bare");
                assert_eq!(table, "posts");
                assert_eq!(column, "title");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(conn.statements().is_empty());
    }
}
