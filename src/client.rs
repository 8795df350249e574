//! The low level wire client: one TCP connection to a table server.

use crate::error::{Result, TableError};
use crate::protocol::{codec, ColumnValue, Command, Record, ResponseCode, TableId, TableInfo};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use tracing::debug;

/// `TableClient` holds one connection to a table server and speaks the binary
/// protocol over it: a request is written and flushed, then the response is
/// read off the same stream. A server-side error response is a complete frame,
/// so the connection stays usable after one.
pub struct TableClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    peer: SocketAddr,
}

impl TableClient {
    /// creates a client and establishes a socket connection to the server at
    /// the given `addr`
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<TableClient> {
        let tcp_reader = TcpStream::connect(addr)?;
        let peer = tcp_reader.peer_addr()?;
        let tcp_writer = tcp_reader.try_clone()?;

        debug!("connected to {}", peer);
        Ok(TableClient {
            reader: BufReader::new(tcp_reader),
            writer: BufWriter::new(tcp_writer),
            peer,
        })
    }

    /// the address of the server this client is connected to
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Fetches the schema rows of every defined table.
    pub fn list_tables(&mut self) -> Result<Vec<TableInfo>> {
        codec::write_uint(&mut self.writer, Command::ListTables.code())?;
        self.writer.flush()?;

        let records = self.read_row_stream()?;
        records
            .iter()
            .map(|record| TableInfo::from_record(record))
            .collect()
    }

    /// Fetches the full contents of the table identified by `table_id`.
    pub fn get_table(&mut self, table_id: TableId) -> Result<Vec<Record>> {
        codec::write_uint(&mut self.writer, Command::GetTable.code())?;
        codec::write_uint(&mut self.writer, u64::from(table_id))?;
        self.writer.flush()?;

        let rows = self.read_row_stream()?;
        debug!("fetched {} rows of table {} from {}", rows.len(), table_id, self.peer);
        Ok(rows)
    }

    /// Appends a row to the table identified by `table_id`.
    ///
    /// ## Returns
    /// the server's invalidate list: the ids of every table whose caches must
    /// be dropped as a result of this mutation
    ///
    /// # Errors
    /// `Err(TableError::Server)` if the server rejected the row
    pub fn add_row(&mut self, table_id: TableId, row: &[ColumnValue]) -> Result<Vec<TableId>> {
        codec::write_uint(&mut self.writer, Command::AddRow.code())?;
        codec::write_uint(&mut self.writer, u64::from(table_id))?;
        codec::write_record(&mut self.writer, row)?;
        self.writer.flush()?;

        self.read_mutation_response()
    }

    /// Removes the row carrying `key` in its key column from the table
    /// identified by `table_id`.
    ///
    /// ## Returns
    /// the server's invalidate list
    ///
    /// # Errors
    /// `Err(TableError::Server)` if the key was not present or the table is
    /// not defined
    pub fn remove_row(&mut self, table_id: TableId, key: &ColumnValue) -> Result<Vec<TableId>> {
        codec::write_uint(&mut self.writer, Command::RemoveRow.code())?;
        codec::write_uint(&mut self.writer, u64::from(table_id))?;
        codec::write_value(&mut self.writer, key)?;
        self.writer.flush()?;

        self.read_mutation_response()
    }

    /// Replaces the row carrying the same key as `row` in the table
    /// identified by `table_id`.
    ///
    /// ## Returns
    /// the server's invalidate list
    ///
    /// # Errors
    /// `Err(TableError::Server)` if no row carries the key or the row is
    /// malformed
    pub fn update_row(&mut self, table_id: TableId, row: &[ColumnValue]) -> Result<Vec<TableId>> {
        codec::write_uint(&mut self.writer, Command::UpdateRow.code())?;
        codec::write_uint(&mut self.writer, u64::from(table_id))?;
        codec::write_record(&mut self.writer, row)?;
        self.writer.flush()?;

        self.read_mutation_response()
    }

    /// Subscribes to server pushed invalidate lists.
    ///
    /// Consumes the client: after the server acknowledges the subscription,
    /// the connection carries nothing but invalidate batches. `on_invalidate`
    /// is called with each batch. Returns `Ok(())` when the server closes the
    /// stream.
    ///
    /// # Errors
    /// returns the underlying error if the subscription is rejected or the
    /// connection dies mid-stream
    pub fn listen<F>(mut self, mut on_invalidate: F) -> Result<()>
    where
        F: FnMut(&[TableId]),
    {
        codec::write_uint(&mut self.writer, Command::Listen.code())?;
        self.writer.flush()?;

        match self.read_response_code()? {
            ResponseCode::Done => {}
            ResponseCode::Error => return Err(self.read_error()),
            ResponseCode::Next => {
                return Err(TableError::Protocol(
                    "unexpected row before listen acknowledgement".to_string(),
                ))
            }
        }
        debug!("listening for invalidations from {}", self.peer);

        loop {
            match self.read_response_code() {
                Ok(ResponseCode::Next) => {
                    let ids = codec::read_table_ids(&mut self.reader)?;
                    debug!("invalidate push from {}: {:?}", self.peer, ids);
                    on_invalidate(&ids);
                }
                Ok(ResponseCode::Done) => return Ok(()),
                Ok(ResponseCode::Error) => return Err(self.read_error()),
                Err(TableError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    debug!("listen stream from {} closed", self.peer);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn read_response_code(&mut self) -> Result<ResponseCode> {
        ResponseCode::from_code(codec::read_uint(&mut self.reader)?)
    }

    // a row stream is zero or more Next+record frames closed by Done
    fn read_row_stream(&mut self) -> Result<Vec<Record>> {
        let mut rows = Vec::new();
        loop {
            match self.read_response_code()? {
                ResponseCode::Next => rows.push(codec::read_record(&mut self.reader)?),
                ResponseCode::Done => return Ok(rows),
                ResponseCode::Error => return Err(self.read_error()),
            }
        }
    }

    // a mutation answers Done+invalidate list or Error+message
    fn read_mutation_response(&mut self) -> Result<Vec<TableId>> {
        match self.read_response_code()? {
            ResponseCode::Done => codec::read_table_ids(&mut self.reader),
            ResponseCode::Error => Err(self.read_error()),
            ResponseCode::Next => Err(TableError::Protocol(
                "unexpected row in mutation response".to_string(),
            )),
        }
    }

    fn read_error(&mut self) -> TableError {
        match codec::read_nullable_utf(&mut self.reader) {
            Ok(message) => {
                TableError::Server(message.unwrap_or_else(|| "unspecified server error".to_string()))
            }
            Err(e) => e,
        }
    }
}
