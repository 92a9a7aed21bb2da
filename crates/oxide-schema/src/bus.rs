//! Multi-table synchronization.
//!
//! The [`Bus`] saves a set of tables that may span several connections in
//! one all-or-nothing run. Destructive changes are staged across every table
//! before anything is created: undeclared foreign keys go first, then
//! undeclared indexes, and only then columns, so a constraint living on one
//! table never blocks a column drop on another. Tables marked for removal
//! are dropped in the last pass, referencing tables before the tables they
//! reference.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::behavior::Behavior;
use crate::driver::{Connection, same_connection};
use crate::error::Result;
use crate::sorter::DependencySorter;
use crate::table::{DropUndeclared, Table, TableSnapshot};

/// Orchestrates the save of several tables inside per-connection
/// transactions.
#[derive(Debug, Clone, Copy)]
pub struct Bus {
    drops: DropUndeclared,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            drops: DropUndeclared::ALL,
        }
    }
}

impl Bus {
    /// Creates a bus that drops every undeclared entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits which undeclared entities the run may drop.
    #[must_use]
    pub const fn with_drops(mut self, drops: DropUndeclared) -> Self {
        self.drops = drops;
        self
    }

    /// The staged passes: behavior and drops for each.
    fn passes(&self) -> [(Behavior, DropUndeclared); 3] {
        let foreign_keys = DropUndeclared {
            foreign_keys: self.drops.foreign_keys,
            ..DropUndeclared::NONE
        };
        let indexes = DropUndeclared {
            indexes: self.drops.indexes,
            ..foreign_keys
        };
        [
            (Behavior::DROP_FOREIGNS, foreign_keys),
            (Behavior::DROP_FOREIGNS | Behavior::DROP_INDEXES, indexes),
            (Behavior::ALL, self.drops),
        ]
    }

    /// Synchronizes every table. Either all of them are saved, or every
    /// transaction is rolled back and the tables are left as they were.
    pub async fn synchronize(&self, tables: &mut [Table]) -> Result<()> {
        if tables.is_empty() {
            return Ok(());
        }

        let order = dependency_order(tables)?;
        let connections = distinct_connections(tables);
        let snapshots: Vec<TableSnapshot> = tables.iter().map(Table::snapshot).collect();

        let mut opened: Vec<Arc<dyn Connection>> = Vec::with_capacity(connections.len());
        for connection in connections {
            if let Err(err) = connection.begin().await {
                rollback(&opened).await;
                return Err(err.into());
            }
            opened.push(connection);
        }
        debug!(
            tables = tables.len(),
            connections = opened.len(),
            "Transactions opened"
        );

        if let Err(err) = self.run_passes(tables, &order).await {
            rollback(&opened).await;
            for (table, snapshot) in tables.iter_mut().zip(snapshots) {
                table.restore(snapshot);
            }
            return Err(err);
        }

        for (position, connection) in opened.iter().enumerate() {
            if let Err(err) = connection.commit().await {
                let (committed, pending) = opened.split_at(position + 1);
                let committed = &committed[..position];
                warn!(
                    connection = %connection.name(),
                    committed = committed.len(),
                    error = %err,
                    "Commit failed, earlier connections stay committed"
                );
                rollback(pending).await;
                for (table, snapshot) in tables.iter_mut().zip(snapshots) {
                    if !committed.iter().any(|c| same_connection(c, table.connection())) {
                        table.restore(snapshot);
                    }
                }
                return Err(err.into());
            }
        }
        info!(tables = tables.len(), "Schema synchronized");
        Ok(())
    }

    async fn run_passes(&self, tables: &mut [Table], order: &[usize]) -> Result<()> {
        let (dropped, kept): (Vec<usize>, Vec<usize>) = order
            .iter()
            .copied()
            .partition(|&index| tables[index].is_drop_pending());

        for (behavior, drops) in self.passes() {
            debug!(%behavior, "Synchronization pass");
            for &index in dropped.iter().rev().chain(&kept) {
                tables[index].sync_in_transaction(behavior, drops).await?;
            }
        }
        Ok(())
    }
}

/// Synchronizes `tables` with a default [`Bus`].
pub async fn synchronize(tables: &mut [Table]) -> Result<()> {
    Bus::new().synchronize(tables).await
}

/// Indexes of `tables`, referenced tables first. Table names are only
/// unique per connection, so each connection is sorted on its own.
fn dependency_order(tables: &[Table]) -> Result<Vec<usize>> {
    let mut order = Vec::with_capacity(tables.len());
    for connection in distinct_connections(tables) {
        let mut sorter = DependencySorter::new();
        for (index, table) in tables.iter().enumerate() {
            if same_connection(table.connection(), &connection) {
                sorter.add(table.short_name(), index, table.dependencies());
            }
        }
        order.extend(sorter.sort()?);
    }
    Ok(order)
}

fn distinct_connections(tables: &[Table]) -> Vec<Arc<dyn Connection>> {
    let mut connections: Vec<Arc<dyn Connection>> = Vec::new();
    for table in tables {
        let connection = table.connection();
        if !connections.iter().any(|c| same_connection(c, connection)) {
            connections.push(Arc::clone(connection));
        }
    }
    connections
}

async fn rollback(opened: &[Arc<dyn Connection>]) {
    for connection in opened.iter().rev() {
        if let Err(err) = connection.rollback().await {
            warn!(connection = %connection.name(), error = %err, "Rollback failed");
        }
    }
}
