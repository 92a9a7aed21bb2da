//! State comparator.
//!
//! Compares the shadow snapshot of a table (what the database holds) with the
//! declared state and reports what was added, dropped or altered. Columns and
//! indexes are matched through pending renames; nothing else is inferred, so a
//! column that disappears while another one appears is a drop plus an add.

use crate::schema::{ColumnSchema, ForeignKeySchema, IndexSchema};
use crate::state::TableState;

/// Differences between two table states.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableDiff<'a> {
    /// Columns present only in the current state.
    pub added_columns: Vec<&'a ColumnSchema>,
    /// Columns present only in the initial state.
    pub dropped_columns: Vec<&'a ColumnSchema>,
    /// `(current, initial)` pairs of columns that changed.
    pub altered_columns: Vec<(&'a ColumnSchema, &'a ColumnSchema)>,
    /// Indexes present only in the current state.
    pub added_indexes: Vec<&'a IndexSchema>,
    /// Indexes present only in the initial state.
    pub dropped_indexes: Vec<&'a IndexSchema>,
    /// `(current, initial)` pairs of indexes that changed.
    pub altered_indexes: Vec<(&'a IndexSchema, &'a IndexSchema)>,
    /// Foreign keys present only in the current state.
    pub added_foreign_keys: Vec<&'a ForeignKeySchema>,
    /// Foreign keys present only in the initial state.
    pub dropped_foreign_keys: Vec<&'a ForeignKeySchema>,
    /// `(current, initial)` pairs of foreign keys that changed.
    pub altered_foreign_keys: Vec<(&'a ForeignKeySchema, &'a ForeignKeySchema)>,
    /// Whether the primary key column list differs.
    pub primary_keys_changed: bool,
    /// Whether the table name differs.
    pub renamed: bool,
}

impl TableDiff<'_> {
    /// True if any column, index or foreign key changed, or the primary key
    /// differs.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.added_columns.is_empty()
            || !self.dropped_columns.is_empty()
            || !self.altered_columns.is_empty()
            || !self.added_indexes.is_empty()
            || !self.dropped_indexes.is_empty()
            || !self.altered_indexes.is_empty()
            || !self.added_foreign_keys.is_empty()
            || !self.dropped_foreign_keys.is_empty()
            || !self.altered_foreign_keys.is_empty()
            || self.primary_keys_changed
    }
}

/// Compares an initial (database-observed) and a current (declared) state.
#[derive(Debug, Clone, Copy)]
pub struct Comparator<'a> {
    initial: &'a TableState,
    current: &'a TableState,
}

impl<'a> Comparator<'a> {
    /// Creates a comparator over two states.
    #[must_use]
    pub fn new(initial: &'a TableState, current: &'a TableState) -> Self {
        Self { initial, current }
    }

    /// Computes the full diff.
    #[must_use]
    pub fn diff(&self) -> TableDiff<'a> {
        TableDiff {
            added_columns: self.added_columns(),
            dropped_columns: self.dropped_columns(),
            altered_columns: self.altered_columns(),
            added_indexes: self.added_indexes(),
            dropped_indexes: self.dropped_indexes(),
            altered_indexes: self.altered_indexes(),
            added_foreign_keys: self.added_foreign_keys(),
            dropped_foreign_keys: self.dropped_foreign_keys(),
            altered_foreign_keys: self.altered_foreign_keys(),
            primary_keys_changed: self.is_primary_changed(),
            renamed: self.is_renamed(),
        }
    }

    /// Shortcut for `diff().has_changes()`.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.diff().has_changes()
    }

    /// Whether the table was renamed.
    #[must_use]
    pub fn is_renamed(&self) -> bool {
        self.initial.name != self.current.name
    }

    /// Whether the primary key list differs, renamed columns taken into account.
    #[must_use]
    pub fn is_primary_changed(&self) -> bool {
        let current: Vec<&str> = self
            .current
            .primary_keys
            .iter()
            .map(|pk| self.current.column_origin(pk))
            .collect();
        current != self.initial.primary_keys
    }

    /// Column of the initial state matching a current column.
    fn initial_column(&self, column: &ColumnSchema) -> Option<&'a ColumnSchema> {
        if self.current.is_renamed_away(&column.name) {
            return None;
        }
        self.initial
            .column(self.current.column_origin(&column.name))
    }

    /// Columns only in the current state.
    #[must_use]
    pub fn added_columns(&self) -> Vec<&'a ColumnSchema> {
        self.current
            .columns
            .values()
            .filter(|c| self.initial_column(c).is_none())
            .collect()
    }

    /// Columns only in the initial state.
    #[must_use]
    pub fn dropped_columns(&self) -> Vec<&'a ColumnSchema> {
        let matched: Vec<&str> = self
            .current
            .columns
            .values()
            .filter_map(|c| self.initial_column(c))
            .map(|c| c.name.as_str())
            .collect();

        self.initial
            .columns
            .values()
            .filter(|c| !matched.contains(&c.name.as_str()))
            .collect()
    }

    /// `(current, initial)` pairs of changed columns.
    #[must_use]
    pub fn altered_columns(&self) -> Vec<(&'a ColumnSchema, &'a ColumnSchema)> {
        self.current
            .columns
            .values()
            .filter_map(|c| self.initial_column(c).map(|i| (c, i)))
            .filter(|(c, i)| !c.same_as(i))
            .collect()
    }

    fn initial_index(&self, index: &IndexSchema) -> Option<&'a IndexSchema> {
        self.initial.index(self.current.index_origin(&index.name))
    }

    /// Whether two matched indexes differ, column renames taken into account.
    fn index_changed(&self, current: &IndexSchema, initial: &IndexSchema) -> bool {
        let columns: Vec<&str> = current
            .columns
            .iter()
            .map(|c| self.current.column_origin(c))
            .collect();
        current.name != initial.name || current.unique != initial.unique || columns != initial.columns
    }

    /// Indexes only in the current state.
    #[must_use]
    pub fn added_indexes(&self) -> Vec<&'a IndexSchema> {
        self.current
            .indexes
            .values()
            .filter(|i| self.initial_index(i).is_none())
            .collect()
    }

    /// Indexes only in the initial state.
    #[must_use]
    pub fn dropped_indexes(&self) -> Vec<&'a IndexSchema> {
        let matched: Vec<&str> = self
            .current
            .indexes
            .values()
            .filter_map(|i| self.initial_index(i))
            .map(|i| i.name.as_str())
            .collect();

        self.initial
            .indexes
            .values()
            .filter(|i| !matched.contains(&i.name.as_str()))
            .collect()
    }

    /// `(current, initial)` pairs of changed indexes.
    #[must_use]
    pub fn altered_indexes(&self) -> Vec<(&'a IndexSchema, &'a IndexSchema)> {
        self.current
            .indexes
            .values()
            .filter_map(|i| self.initial_index(i).map(|init| (i, init)))
            .filter(|(c, i)| self.index_changed(c, i))
            .collect()
    }

    fn foreign_key_changed(&self, current: &ForeignKeySchema, initial: &ForeignKeySchema) -> bool {
        let columns: Vec<&str> = current
            .columns
            .iter()
            .map(|c| self.current.column_origin(c))
            .collect();
        columns != initial.columns
            || current.foreign_table != initial.foreign_table
            || current.foreign_columns != initial.foreign_columns
            || current.on_delete != initial.on_delete
            || current.on_update != initial.on_update
    }

    /// Foreign keys only in the current state.
    #[must_use]
    pub fn added_foreign_keys(&self) -> Vec<&'a ForeignKeySchema> {
        self.current
            .foreign_keys
            .values()
            .filter(|fk| self.initial.foreign_key(&fk.name).is_none())
            .collect()
    }

    /// Foreign keys only in the initial state.
    #[must_use]
    pub fn dropped_foreign_keys(&self) -> Vec<&'a ForeignKeySchema> {
        self.initial
            .foreign_keys
            .values()
            .filter(|fk| self.current.foreign_key(&fk.name).is_none())
            .collect()
    }

    /// `(current, initial)` pairs of changed foreign keys.
    #[must_use]
    pub fn altered_foreign_keys(&self) -> Vec<(&'a ForeignKeySchema, &'a ForeignKeySchema)> {
        self.current
            .foreign_keys
            .values()
            .filter_map(|fk| self.initial.foreign_key(&fk.name).map(|i| (fk, i)))
            .filter(|(c, i)| self.foreign_key_changed(c, i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DefaultValue, ForeignKeyAction};

    fn users() -> TableState {
        let mut state = TableState::new("users", "");
        let mut id = ColumnSchema::new("id");
        id.primary();
        let mut email = ColumnSchema::new("email");
        email.string(255).nullable(true);
        state.add_column(id);
        state.add_column(email);
        state.primary_keys = vec!["id".to_string()];
        state.add_index(IndexSchema::new("users_index_email", vec!["email".to_string()]));
        state
    }

    #[test]
    fn test_empty_table_has_no_changes() {
        let state = TableState::new("users", "");
        assert!(!Comparator::new(&state, &state).has_changes());
    }

    #[test]
    fn test_identical_states_have_no_changes() {
        let state = users();
        let diff = Comparator::new(&state, &state).diff();
        assert!(!diff.has_changes());
        assert!(!diff.renamed);
        assert_eq!(diff, TableDiff::default());
    }

    #[test]
    fn test_added_nullable_column() {
        let initial = users();
        let mut current = initial.clone();
        let mut bio = ColumnSchema::new("bio");
        bio.text().nullable(true);
        current.add_column(bio);

        let diff = Comparator::new(&initial, &current).diff();
        let added: Vec<&str> = diff.added_columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(added, vec!["bio"]);
        assert!(diff.dropped_columns.is_empty());
        assert!(diff.altered_columns.is_empty());
        assert!(diff.has_changes());
    }

    #[test]
    fn test_dropped_and_altered_columns() {
        let initial = users();
        let mut current = initial.clone();
        current.remove_column("email");
        current
            .column_mut("id")
            .unwrap()
            .default_value(DefaultValue::Integer(1));

        let diff = Comparator::new(&initial, &current).diff();
        assert_eq!(diff.dropped_columns.len(), 1);
        assert_eq!(diff.dropped_columns[0].name, "email");
        assert_eq!(diff.dropped_indexes.len(), 1);
        assert_eq!(diff.altered_columns.len(), 1);
        let (current_id, initial_id) = diff.altered_columns[0];
        assert_eq!(current_id.default, DefaultValue::Integer(1));
        assert_eq!(initial_id.default, DefaultValue::None);
    }

    #[test]
    fn test_rename_without_declaration_is_drop_and_add() {
        let initial = users();
        let mut current = initial.clone();
        let email = current.remove_column("email").unwrap().0;
        let mut mail = email;
        mail.name = "mail".to_string();
        current.add_column(mail);

        let diff = Comparator::new(&initial, &current).diff();
        assert_eq!(diff.added_columns[0].name, "mail");
        assert_eq!(diff.dropped_columns[0].name, "email");
        assert!(diff.altered_columns.is_empty());
    }

    #[test]
    fn test_declared_rename_is_an_alteration() {
        let initial = users();
        let mut current = initial.clone();
        current.rename_column("email", "mail").unwrap();

        let diff = Comparator::new(&initial, &current).diff();
        assert!(diff.added_columns.is_empty());
        assert!(diff.dropped_columns.is_empty());
        assert_eq!(diff.altered_columns.len(), 1);
        assert_eq!(diff.altered_columns[0].0.name, "mail");
        assert_eq!(diff.altered_columns[0].1.name, "email");
        // The index follows the column and is not reported.
        assert!(diff.altered_indexes.is_empty());
    }

    #[test]
    fn test_reusing_a_renamed_away_name_is_an_addition() {
        let initial = users();
        let mut current = initial.clone();
        current.rename_column("email", "mail").unwrap();
        let mut email = ColumnSchema::new("email");
        email.text().nullable(true);
        current.add_column(email);

        let diff = Comparator::new(&initial, &current).diff();
        assert_eq!(diff.added_columns.len(), 1);
        assert_eq!(diff.added_columns[0].name, "email");
        assert_eq!(diff.altered_columns.len(), 1);
        assert!(diff.dropped_columns.is_empty());
    }

    #[test]
    fn test_index_changes() {
        let initial = users();
        let mut current = initial.clone();
        current
            .indexes
            .get_mut("users_index_email")
            .unwrap()
            .unique(true);
        current.add_index(IndexSchema::new("users_index_id", vec!["id".to_string()]));

        let diff = Comparator::new(&initial, &current).diff();
        assert_eq!(diff.altered_indexes.len(), 1);
        assert!(diff.altered_indexes[0].0.unique);
        assert_eq!(diff.added_indexes[0].name, "users_index_id");
        assert!(diff.dropped_indexes.is_empty());
    }

    #[test]
    fn test_renamed_index_is_altered() {
        let initial = users();
        let mut current = initial.clone();
        current
            .rename_index("users_index_email", "users_by_email")
            .unwrap();

        let diff = Comparator::new(&initial, &current).diff();
        assert!(diff.added_indexes.is_empty());
        assert!(diff.dropped_indexes.is_empty());
        assert_eq!(diff.altered_indexes[0].0.name, "users_by_email");
        assert_eq!(diff.altered_indexes[0].1.name, "users_index_email");
    }

    #[test]
    fn test_foreign_key_changes() {
        let mut initial = users();
        let mut fk = ForeignKeySchema::new("users_team", vec!["id".to_string()]);
        fk.references("teams", ["id"]);
        initial.add_foreign_key(fk);

        let mut current = initial.clone();
        current
            .foreign_keys
            .get_mut("users_team")
            .unwrap()
            .on_delete(ForeignKeyAction::Cascade);
        let diff = Comparator::new(&initial, &current).diff();
        assert_eq!(diff.altered_foreign_keys.len(), 1);

        current.remove_foreign_key("users_team");
        let diff = Comparator::new(&initial, &current).diff();
        assert_eq!(diff.dropped_foreign_keys[0].name, "users_team");
        assert!(diff.altered_foreign_keys.is_empty());
    }

    #[test]
    fn test_primary_key_and_rename_flags() {
        let initial = users();
        let mut current = initial.clone();
        current.primary_keys = vec!["id".to_string(), "email".to_string()];
        current.name = "accounts".to_string();

        let diff = Comparator::new(&initial, &current).diff();
        assert!(diff.primary_keys_changed);
        assert!(diff.renamed);
        assert!(diff.has_changes());

        let mut renamed_pk = initial.clone();
        renamed_pk.rename_column("id", "user_id").unwrap();
        assert!(!Comparator::new(&initial, &renamed_pk).is_primary_changed());
    }
}
