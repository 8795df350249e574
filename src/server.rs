//! The reference table server.
//!
//! [`TableServer`] accepts connections and dispatches each one onto a thread
//! pool. A connection carries a sequence of commands; mutations publish their
//! invalidate list to the [`InvalidateBus`], from which `Listen` connections
//! stream batches to subscribed clients.

use crate::error::{Result, TableError};
use crate::protocol::{codec, Command, Record, ResponseCode, TableId};
use crate::store::TableStore;
use crate::thread_pool::ThreadPool;
use crossbeam::channel::{self, Receiver, Sender};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Fan-out of invalidate lists to subscribed listen connections.
///
/// Publishing clones the batch to every live subscriber; a subscriber whose
/// receiving end is gone is pruned on the next publish.
#[derive(Clone, Default)]
pub struct InvalidateBus {
    subscribers: Arc<Mutex<Vec<Sender<Vec<TableId>>>>>,
}

impl InvalidateBus {
    /// creates a bus with no subscribers
    pub fn new() -> InvalidateBus {
        InvalidateBus::default()
    }

    /// registers a new subscriber and returns its receiving end
    pub fn subscribe(&self) -> Receiver<Vec<TableId>> {
        let (tx, rx) = channel::unbounded();
        self.subscribers
            .lock()
            .expect("bus lock poisoned")
            .push(tx);
        rx
    }

    /// delivers one invalidate list to every live subscriber
    pub fn publish(&self, ids: &[TableId]) {
        self.subscribers
            .lock()
            .expect("bus lock poisoned")
            .retain(|tx| tx.send(ids.to_vec()).is_ok());
    }
}

/// A TCP server exposing a [`TableStore`] over the binary table protocol.
///
/// Each connection is serviced on a thread from the pool, with a clone of the
/// store and of the invalidate bus.
pub struct TableServer<S: TableStore, P: ThreadPool> {
    store: S,
    pool: P,
    bus: InvalidateBus,
}

impl<S: TableStore, P: ThreadPool> TableServer<S, P> {
    /// creates a server over the given store and pool
    pub fn new(store: S, pool: P) -> TableServer<S, P> {
        TableServer {
            store,
            pool,
            bus: InvalidateBus::new(),
        }
    }

    /// binds the given address and serves until the process exits
    ///
    /// # Errors
    /// returns an error if the address cannot be bound
    pub fn run<A: ToSocketAddrs>(self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        self.run_on(listener)
    }

    /// serves on an already bound listener; used by tests that bind an
    /// ephemeral port first
    pub fn run_on(self, listener: TcpListener) -> Result<()> {
        info!("listening on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let store = self.store.clone();
                    let bus = self.bus.clone();
                    self.pool.spawn(move || {
                        if let Err(e) = serve(store, bus, stream) {
                            error!("error on serving client: {}", e);
                        }
                    });
                }
                Err(e) => error!("connection failed: {}", e),
            }
        }
        Ok(())
    }
}

/// Services one connection: decodes commands, executes them on the store and
/// writes responses until the client disconnects.
fn serve<S: TableStore>(store: S, bus: InvalidateBus, tcp: TcpStream) -> Result<()> {
    let peer = tcp.peer_addr()?;
    let mut reader = BufReader::new(tcp.try_clone()?);
    let mut writer = BufWriter::new(tcp);

    loop {
        let code = match codec::read_uint(&mut reader) {
            Ok(code) => code,
            Err(TableError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!("client {} disconnected", peer);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let command = match Command::from_code(code) {
            Ok(command) => command,
            Err(e) => {
                // the rest of the stream cannot be framed; answer and drop
                send_error(&mut writer, &e)?;
                return Ok(());
            }
        };
        debug!("request from {}: {:?}", peer, command);

        match command {
            Command::ListTables => match store.tables() {
                Ok(infos) => {
                    send_rows(&mut writer, infos.iter().map(|info| info.to_record()))?
                }
                Err(e) => send_error(&mut writer, &e)?,
            },
            Command::GetTable => {
                let table_id = read_table_id(&mut reader)?;
                match store.rows(table_id) {
                    Ok(rows) => send_rows(&mut writer, rows.into_iter())?,
                    Err(e) => send_error(&mut writer, &e)?,
                }
            }
            Command::AddRow => {
                let table_id = read_table_id(&mut reader)?;
                let row = codec::read_record(&mut reader)?;
                match store.add_row(table_id, row) {
                    Ok(invalidated) => {
                        send_done_with_ids(&mut writer, &invalidated)?;
                        bus.publish(&invalidated);
                    }
                    Err(e) => send_error(&mut writer, &e)?,
                }
            }
            Command::RemoveRow => {
                let table_id = read_table_id(&mut reader)?;
                let key = codec::read_value(&mut reader)?;
                match store.remove_row(table_id, &key) {
                    Ok(invalidated) => {
                        send_done_with_ids(&mut writer, &invalidated)?;
                        bus.publish(&invalidated);
                    }
                    Err(e) => send_error(&mut writer, &e)?,
                }
            }
            Command::UpdateRow => {
                let table_id = read_table_id(&mut reader)?;
                let row = codec::read_record(&mut reader)?;
                match store.update_row(table_id, row) {
                    Ok(invalidated) => {
                        send_done_with_ids(&mut writer, &invalidated)?;
                        bus.publish(&invalidated);
                    }
                    Err(e) => send_error(&mut writer, &e)?,
                }
            }
            Command::Listen => return serve_listen(&bus, writer, peer),
        }
    }
}

// a listen connection blocks on the bus and forwards batches until its
// socket or the bus goes away
fn serve_listen(
    bus: &InvalidateBus,
    mut writer: BufWriter<TcpStream>,
    peer: SocketAddr,
) -> Result<()> {
    let rx = bus.subscribe();
    codec::write_uint(&mut writer, ResponseCode::Done.code())?;
    writer.flush()?;
    debug!("client {} subscribed to invalidations", peer);

    while let Ok(ids) = rx.recv() {
        let pushed = codec::write_uint(&mut writer, ResponseCode::Next.code())
            .and_then(|_| codec::write_table_ids(&mut writer, &ids))
            .and_then(|_| writer.flush().map_err(TableError::from));
        if pushed.is_err() {
            debug!("listener {} disconnected", peer);
            return Ok(());
        }
    }
    Ok(())
}

fn read_table_id(reader: &mut BufReader<TcpStream>) -> Result<TableId> {
    let id = codec::read_uint(reader)?;
    if id > u64::from(TableId::MAX) {
        return Err(TableError::Protocol(format!("table id {} out of range", id)));
    }
    Ok(id as TableId)
}

fn send_rows<W, I>(writer: &mut W, rows: I) -> Result<()>
where
    W: Write,
    I: Iterator<Item = Record>,
{
    for row in rows {
        codec::write_uint(writer, ResponseCode::Next.code())?;
        codec::write_record(writer, &row)?;
    }
    codec::write_uint(writer, ResponseCode::Done.code())?;
    writer.flush()?;
    Ok(())
}

fn send_done_with_ids<W: Write>(writer: &mut W, ids: &[TableId]) -> Result<()> {
    codec::write_uint(writer, ResponseCode::Done.code())?;
    codec::write_table_ids(writer, ids)?;
    writer.flush()?;
    Ok(())
}

fn send_error<W: Write>(writer: &mut W, error: &TableError) -> Result<()> {
    debug!("responding with error: {}", error);
    codec::write_uint(writer, ResponseCode::Error.code())?;
    codec::write_nullable_utf(writer, Some(&error.to_string()))?;
    writer.flush()?;
    Ok(())
}
