use crate::protocol::TableId;
use thiserror::Error;

/// type alias for all operations in this crate that could fail with a [`TableError`]
pub type Result<T> = std::result::Result<T, TableError>;

/// The error variants used throughout the crate.
///
/// Lower level errors from third party crates are wrapped via `#[from]`
/// conversions, everything else gets a typed variant so that callers (and the
/// server's error responses) can report something meaningful.
#[derive(Error, Debug)]
pub enum TableError {
    /// variant for errors caused by socket or file IO
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// variant for errors while (de)serializing persisted data
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// variant for errors raised by the sled storage backend
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    /// the byte stream did not conform to the wire protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// the server answered a request with an error response
    #[error("server error: {0}")]
    Server(String),

    /// a command line or literal value could not be parsed
    #[error("parse error: {0}")]
    Parsing(String),

    /// the requested table id is not defined
    #[error("unknown table id {0}")]
    UnknownTable(TableId),

    /// a table with this id is already defined
    #[error("table id {0} is already defined")]
    TableExists(TableId),

    /// a table definition was rejected
    #[error("invalid table definition: {0}")]
    InvalidDefinition(String),

    /// a row did not match the table's column count
    #[error("wrong column count: expected {expected}, got {actual}")]
    ColumnCount {
        /// the column count declared by the table definition
        expected: usize,
        /// the column count of the offending row
        actual: usize,
    },

    /// the key column of a row held an unusable value
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// a row with the same key already exists in the table
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// no row carries the given key
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// two rows carry the same value in a column queried as unique
    #[error("duplicate value in unique column {column}: {value}")]
    DuplicateUnique {
        /// the zero-based column index
        column: usize,
        /// the display form of the colliding value
        value: String,
    },
}
