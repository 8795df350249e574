//! Typed rows layered over generic wire records.
//!
//! A table's rows travel as untyped [`Record`]s; the [`Row`] trait is the
//! seam where library users attach a typed struct to a table. Column `0` is
//! by convention the key column and is kept unique per table by the server.

use crate::error::Result;
use crate::protocol::{ColumnValue, Record};
use std::hash::Hash;

/// One typed row of one table.
///
/// Implementations convert to and from the wire [`Record`] shape and expose
/// individual cells for index building. `to_record` followed by `from_record`
/// must reproduce the row, and `column(0)` must equal the wire form of the
/// key.
pub trait Row: Clone + Send + Sync + 'static {
    /// the type of the unique key carried in column `0`
    type Key: Eq + Hash + Clone + Send + Sync + 'static;

    /// the unique key of this row
    fn key(&self) -> Self::Key;

    /// decodes a row from its wire record
    ///
    /// # Errors
    /// returns an error if the record does not have this row type's shape
    fn from_record(record: Record) -> Result<Self>
    where
        Self: Sized;

    /// encodes this row as a wire record
    fn to_record(&self) -> Record;

    /// the cell at `index`; out of range indexes yield [`ColumnValue::Null`]
    fn column(&self, index: usize) -> ColumnValue;
}

/// The trivial [`Row`] over a raw wire record.
///
/// Used by the command line client and anywhere no typed struct exists for a
/// table. The key is the value of column `0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    values: Record,
}

impl RecordRow {
    /// wraps a wire record
    pub fn new(values: Record) -> RecordRow {
        RecordRow { values }
    }

    /// the underlying cells
    pub fn values(&self) -> &[ColumnValue] {
        &self.values
    }
}

impl Row for RecordRow {
    type Key = ColumnValue;

    fn key(&self) -> ColumnValue {
        self.values.first().cloned().unwrap_or(ColumnValue::Null)
    }

    fn from_record(record: Record) -> Result<RecordRow> {
        Ok(RecordRow { values: record })
    }

    fn to_record(&self) -> Record {
        self.values.clone()
    }

    fn column(&self, index: usize) -> ColumnValue {
        self.values.get(index).cloned().unwrap_or(ColumnValue::Null)
    }
}
