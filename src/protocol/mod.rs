//! The wire protocol shared by the client and the server.
//!
//! Every request starts with a [`Command`] code and every response with a
//! [`ResponseCode`], both sent as compressed integers. The payloads are built
//! from a small set of framing primitives implemented in [`codec`]:
//! compressed (variable length) integers, length prefixed UTF-8 strings with
//! an optional presence byte, typed [`ColumnValue`] cells and [`Record`] rows.
//!
//! Mutating commands answer with `Done` followed by an *invalidate list*: the
//! ids of every table whose client side caches must be dropped as a result of
//! the mutation.

use crate::error::{Result, TableError};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod codec;

/// Identifies one server-side table.
pub type TableId = u32;

/// The request opcodes understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// list the defined tables as `(id, name, columns)` records
    ListTables,
    /// fetch the full contents of one table
    GetTable,
    /// append a row to a table
    AddRow,
    /// remove the row carrying a given key from a table
    RemoveRow,
    /// replace the row carrying the same key as the given row
    UpdateRow,
    /// subscribe to invalidate lists pushed for every mutation
    Listen,
}

impl Command {
    /// the numeric code sent on the wire
    pub fn code(self) -> u64 {
        match self {
            Command::ListTables => 1,
            Command::GetTable => 2,
            Command::AddRow => 3,
            Command::RemoveRow => 4,
            Command::UpdateRow => 5,
            Command::Listen => 6,
        }
    }

    /// decodes a numeric command code
    ///
    /// # Errors
    /// returns [`TableError::Protocol`] for codes no command maps to
    pub fn from_code(code: u64) -> Result<Command> {
        match code {
            1 => Ok(Command::ListTables),
            2 => Ok(Command::GetTable),
            3 => Ok(Command::AddRow),
            4 => Ok(Command::RemoveRow),
            5 => Ok(Command::UpdateRow),
            6 => Ok(Command::Listen),
            other => Err(TableError::Protocol(format!("unknown command code {}", other))),
        }
    }
}

/// The discriminator that starts every response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// one more payload item (a record, or an invalidate list on a listen
    /// stream) follows
    Next,
    /// the request completed; mutations follow this with their invalidate list
    Done,
    /// the request failed; a nullable UTF message follows
    Error,
}

impl ResponseCode {
    /// the numeric code sent on the wire
    pub fn code(self) -> u64 {
        match self {
            ResponseCode::Next => 1,
            ResponseCode::Done => 2,
            ResponseCode::Error => 3,
        }
    }

    /// decodes a numeric response code
    ///
    /// # Errors
    /// returns [`TableError::Protocol`] for codes no response maps to
    pub fn from_code(code: u64) -> Result<ResponseCode> {
        match code {
            1 => Ok(ResponseCode::Next),
            2 => Ok(ResponseCode::Done),
            3 => Ok(ResponseCode::Error),
            other => Err(TableError::Protocol(format!("unknown response code {}", other))),
        }
    }
}

/// A single typed cell of a row.
///
/// The variants are restricted to types with a total equality so that values
/// can key the per-column index maps built by the cache layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnValue {
    /// the absence of a value; never indexed
    Null,
    /// a boolean cell
    Bool(bool),
    /// a signed integer cell
    Int(i64),
    /// a text cell
    Text(String),
}

impl ColumnValue {
    /// returns `true` for [`ColumnValue::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    /// Parses a command line literal into a value.
    ///
    /// `null`, `true` and `false` map to their variants, anything that parses
    /// as an `i64` becomes an integer, a single- or double-quoted token is
    /// unquoted text (so `"42"` stays text), and everything else is bare text.
    pub fn parse_literal(s: &str) -> ColumnValue {
        match s {
            "null" => return ColumnValue::Null,
            "true" => return ColumnValue::Bool(true),
            "false" => return ColumnValue::Bool(false),
            _ => {}
        }
        if let Ok(n) = s.parse::<i64>() {
            return ColumnValue::Int(n);
        }
        let quoted = (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
            || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2);
        if quoted {
            ColumnValue::Text(s[1..s.len() - 1].to_string())
        } else {
            ColumnValue::Text(s.to_string())
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => write!(f, "null"),
            ColumnValue::Bool(b) => write!(f, "{}", b),
            ColumnValue::Int(n) => write!(f, "{}", n),
            ColumnValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One wire row: a sequence of typed cells.
pub type Record = Vec<ColumnValue>;

/// The schema row returned by [`Command::ListTables`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// the table id
    pub id: TableId,
    /// the table name
    pub name: String,
    /// the number of columns per row
    pub columns: usize,
}

impl TableInfo {
    /// encodes the schema row as a wire record
    pub fn to_record(&self) -> Record {
        vec![
            ColumnValue::Int(i64::from(self.id)),
            ColumnValue::Text(self.name.clone()),
            ColumnValue::Int(self.columns as i64),
        ]
    }

    /// decodes a schema row from a wire record
    ///
    /// # Errors
    /// returns [`TableError::Protocol`] if the record does not have the
    /// `(Int, Text, Int)` shape
    pub fn from_record(record: &[ColumnValue]) -> Result<TableInfo> {
        match record {
            [ColumnValue::Int(id), ColumnValue::Text(name), ColumnValue::Int(columns)]
                if *id >= 0 && *id <= i64::from(TableId::MAX) && *columns >= 0 =>
            {
                Ok(TableInfo {
                    id: *id as TableId,
                    name: name.clone(),
                    columns: *columns as usize,
                })
            }
            other => Err(TableError::Protocol(format!(
                "malformed schema record: {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes_roundtrip() {
        for cmd in [
            Command::ListTables,
            Command::GetTable,
            Command::AddRow,
            Command::RemoveRow,
            Command::UpdateRow,
            Command::Listen,
        ] {
            assert_eq!(Command::from_code(cmd.code()).unwrap(), cmd);
        }
        assert!(Command::from_code(0).is_err());
        assert!(Command::from_code(99).is_err());
    }

    #[test]
    fn response_codes_roundtrip() {
        for code in [ResponseCode::Next, ResponseCode::Done, ResponseCode::Error] {
            assert_eq!(ResponseCode::from_code(code.code()).unwrap(), code);
        }
        assert!(ResponseCode::from_code(7).is_err());
    }

    #[test]
    fn literal_parsing() {
        assert_eq!(ColumnValue::parse_literal("null"), ColumnValue::Null);
        assert_eq!(ColumnValue::parse_literal("true"), ColumnValue::Bool(true));
        assert_eq!(ColumnValue::parse_literal("-17"), ColumnValue::Int(-17));
        assert_eq!(
            ColumnValue::parse_literal("\"42\""),
            ColumnValue::Text("42".to_string())
        );
        assert_eq!(
            ColumnValue::parse_literal("alpha"),
            ColumnValue::Text("alpha".to_string())
        );
    }

    #[test]
    fn table_info_record_shape() {
        let info = TableInfo {
            id: 7,
            name: "widgets".to_string(),
            columns: 3,
        };
        assert_eq!(TableInfo::from_record(&info.to_record()).unwrap(), info);
        assert!(TableInfo::from_record(&[ColumnValue::Null]).is_err());
    }
}
