//! Dependency sorter.
//!
//! Orders items so that every item comes after the items it depends on.
//! Used by the [`Bus`](crate::bus::Bus) to create referenced tables before
//! the tables holding foreign keys to them.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{Result, SchemaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Depth-first topological sorter over keyed items.
///
/// Self-dependencies and dependencies on unknown keys are ignored. A real
/// cycle is reported as [`SchemaError::CircularDependency`].
#[derive(Debug)]
pub struct DependencySorter<T> {
    entries: IndexMap<String, (T, Vec<String>)>,
}

impl<T> Default for DependencySorter<T> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<T> DependencySorter<T> {
    /// Creates an empty sorter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item. Adding the same key twice replaces the earlier item.
    pub fn add(&mut self, key: impl Into<String>, item: T, dependencies: Vec<String>) {
        self.entries.insert(key.into(), (item, dependencies));
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no item was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consumes the sorter and returns the items, dependencies first.
    /// Independent items keep their insertion order.
    pub fn sort(self) -> Result<Vec<T>> {
        let mut marks: HashMap<usize, Mark> = HashMap::new();
        let mut order: Vec<usize> = Vec::with_capacity(self.entries.len());
        let mut path: Vec<usize> = Vec::new();

        for index in 0..self.entries.len() {
            self.visit(index, &mut marks, &mut order, &mut path)?;
        }

        let mut items: Vec<Option<T>> = self
            .entries
            .into_values()
            .map(|(item, _)| Some(item))
            .collect();
        Ok(order
            .into_iter()
            .filter_map(|index| items[index].take())
            .collect())
    }

    fn visit(
        &self,
        index: usize,
        marks: &mut HashMap<usize, Mark>,
        order: &mut Vec<usize>,
        path: &mut Vec<usize>,
    ) -> Result<()> {
        match marks.get(&index) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = path.iter().position(|i| *i == index).unwrap_or(0);
                let tables = path[start..]
                    .iter()
                    .chain(std::iter::once(&index))
                    .filter_map(|i| self.entries.get_index(*i))
                    .map(|(key, _)| key.clone())
                    .collect();
                return Err(SchemaError::CircularDependency { tables });
            }
            None => {}
        }

        marks.insert(index, Mark::InProgress);
        path.push(index);

        if let Some((key, (_, dependencies))) = self.entries.get_index(index) {
            for dependency in dependencies {
                if dependency == key {
                    continue;
                }
                if let Some(dep_index) = self.entries.get_index_of(dependency) {
                    self.visit(dep_index, marks, order, path)?;
                }
            }
        }

        path.pop();
        marks.insert(index, Mark::Done);
        order.push(index);
        Ok(())
    }
}

/// Sorts `(name, dependencies)` pairs and returns the names, dependencies
/// first.
pub fn sort<I, S>(items: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = (S, Vec<String>)>,
    S: Into<String>,
{
    let mut sorter = DependencySorter::new();
    for (name, dependencies) in items {
        let name = name.into();
        sorter.add(name.clone(), name, dependencies);
    }
    sorter.sort()
}
