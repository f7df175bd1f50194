//! Stable column indexing.
//!
//! A [`ColumnMap`] assigns every enabled column an offset into a row. The
//! mapping is built once per stage instance and never renumbered; consumers
//! look columns up by their symbolic name.

use crate::error::{TableError, TableResult};

/// Offset of a column inside a table row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Column(usize);

impl Column {
    pub fn offset(self) -> usize {
        self.0
    }
}

/// Ordered, duplicate-free list of column names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnMap {
    names: Vec<String>,
}

impl ColumnMap {
    pub fn builder() -> ColumnMapBuilder {
        ColumnMapBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index(&self, name: &str) -> Option<Column> {
        self.names.iter().position(|n| n == name).map(Column)
    }

    /// Like [`ColumnMap::index`], but a missing column is an error.
    ///
    /// This is the boundary check for optional columns: a disabled feature
    /// never registers its column, so reading it fails here instead of
    /// returning garbage.
    pub fn require(&self, name: &str) -> TableResult<Column> {
        self.index(name).ok_or_else(|| TableError::UnknownColumn {
            name: name.to_string(),
        })
    }

    pub fn name(&self, column: Column) -> &str {
        &self.names[column.0]
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Column, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (Column(i), n.as_str()))
    }
}

/// Incremental builder for a [`ColumnMap`].
#[derive(Debug, Default)]
pub struct ColumnMapBuilder {
    names: Vec<String>,
}

impl ColumnMapBuilder {
    pub fn push(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    /// Register the column only when its feature is enabled.
    pub fn push_if(self, enabled: bool, name: impl Into<String>) -> Self {
        if enabled { self.push(name) } else { self }
    }

    pub fn build(self) -> TableResult<ColumnMap> {
        for (i, name) in self.names.iter().enumerate() {
            if self.names[..i].contains(name) {
                return Err(TableError::Shape {
                    what: format!("duplicate column '{name}'"),
                });
            }
        }
        Ok(ColumnMap { names: self.names })
    }
}
