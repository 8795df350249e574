//! This module provides the server-side table storage implementations.
//!
//! Two stores are implemented: the concurrent in-memory [`MemoryStore`] and
//! [`SledStore`], a wrapper around the [`sled`] database engine that persists
//! tables across restarts.
//!
//! [`sled`]: https://docs.rs/sled/latest/sled/

use crate::error::{Result, TableError};
use crate::protocol::{ColumnValue, Record, TableId, TableInfo};
use serde::{Deserialize, Serialize};

/// The definition of one server-side table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// the table id
    pub id: TableId,
    /// the table name
    pub name: String,
    /// the number of columns per row; column `0` is the unique key
    pub columns: usize,
    /// ids appended to this table's invalidate lists, modeling tables whose
    /// contents derive from this one
    pub dependents: Vec<TableId>,
}

impl TableDef {
    /// creates a definition with no dependents
    pub fn new(id: TableId, name: &str, columns: usize) -> TableDef {
        TableDef {
            id,
            name: name.to_string(),
            columns,
            dependents: Vec::new(),
        }
    }

    /// builder method adding dependent table ids
    pub fn with_dependents(mut self, dependents: Vec<TableId>) -> TableDef {
        self.dependents = dependents;
        self
    }

    /// the schema row advertised for this table
    pub fn info(&self) -> TableInfo {
        TableInfo {
            id: self.id,
            name: self.name.clone(),
            columns: self.columns,
        }
    }

    // the ids a mutation of this table invalidates: the table itself first,
    // then its dependents
    pub(crate) fn invalidate_list(&self) -> Vec<TableId> {
        let mut ids = Vec::with_capacity(1 + self.dependents.len());
        ids.push(self.id);
        ids.extend(self.dependents.iter().copied());
        ids
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.columns == 0 {
            return Err(TableError::InvalidDefinition(format!(
                "table {} must have at least the key column",
                self.name
            )));
        }
        if self.name.is_empty() {
            return Err(TableError::InvalidDefinition(
                "table name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A trait for the basic functionality of a table storage engine.
///
/// Mutations return the invalidate list of the touched table, which the
/// server forwards to clients in the mutation response and over listen
/// streams.
pub trait TableStore: Clone + Send + 'static {
    /// Registers a new table.
    ///
    /// # Errors
    /// returns [`TableError::TableExists`] if the id is taken and
    /// [`TableError::InvalidDefinition`] for a malformed definition
    fn define_table(&self, def: TableDef) -> Result<()>;

    /// the schema rows of every defined table, ordered by id
    fn tables(&self) -> Result<Vec<TableInfo>>;

    /// the full contents of one table
    fn rows(&self, id: TableId) -> Result<Vec<Record>>;

    /// Appends a row, enforcing the column count and the uniqueness of the
    /// key column.
    ///
    /// # Errors
    /// [`TableError::UnknownTable`], [`TableError::ColumnCount`],
    /// [`TableError::InvalidKey`] for a null key, or
    /// [`TableError::DuplicateKey`]
    fn add_row(&self, id: TableId, row: Record) -> Result<Vec<TableId>>;

    /// Removes the row carrying `key` in its key column.
    ///
    /// # Errors
    /// [`TableError::UnknownTable`] or [`TableError::KeyNotFound`]
    fn remove_row(&self, id: TableId, key: &ColumnValue) -> Result<Vec<TableId>>;

    /// Replaces the row carrying the same key as `row`.
    ///
    /// # Errors
    /// [`TableError::UnknownTable`], [`TableError::ColumnCount`],
    /// [`TableError::InvalidKey`] for a null key, or
    /// [`TableError::KeyNotFound`] if no row carries the key
    fn update_row(&self, id: TableId, row: Record) -> Result<Vec<TableId>>;
}

pub(crate) fn check_row(def: &TableDef, row: &[ColumnValue]) -> Result<()> {
    if row.len() != def.columns {
        return Err(TableError::ColumnCount {
            expected: def.columns,
            actual: row.len(),
        });
    }
    if row[0].is_null() {
        return Err(TableError::InvalidKey(
            "key column must not be null".to_string(),
        ));
    }
    Ok(())
}

mod memory;
mod sled;

pub use self::memory::MemoryStore;
pub use self::sled::SledStore;
