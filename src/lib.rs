#![deny(missing_docs)]
//! A client-side cached table layer (tablecache) over a compact binary table
//! RPC protocol.
//!
//! A remote server owns a set of identified tables; clients mirror those
//! tables in full-table, in-memory caches and look rows up through lazily
//! built per-column indexes. Data moves between the client and server using
//! synchronous networking over a custom binary protocol.
//!
//! ## Supported Table Operations
//! The protocol supports five operations (a.k.a "commands"):
//!
//! - `LIST TABLES` the schema rows of every defined table
//! - `GET TABLE` the full contents of one table
//! - `ADD ROW` to a table
//! - `REMOVE ROW` carrying a given key from a table
//! - `LISTEN` for invalidate lists pushed after every mutation
//!
//! See the [`Command`] and [`ResponseCode`] types for the framing of these
//! operations.
//!
//! ## CachedTable
//! [`CachedTable`] is the brains of the client side. It is responsible for
//! the following tasks:
//! - lazily loading a full snapshot of one server-side table through a
//!   [`RowSource`]
//! - building per-column unique-value and indexed-value hash maps on the
//!   first lookup that needs them
//! - answering key, unique-column and indexed-column lookups from those maps
//! - dropping the snapshot and every derived map when the table is named in
//!   an invalidate list, so the next access retries the whole cache load
//!
//! There is no partial invalidation, no eviction and no size bound: a cache
//! is either absent or a complete snapshot.
//!
//! ## Connector / Invalidation
//! [`Connector`] is the application facing handle: it shares one connection
//! among clones, hands out cached tables, and keeps them coherent by applying
//! the *invalidate list* that the server attaches to every mutation response.
//! [`Connector::spawn_listener`] subscribes a background thread to the same
//! lists so that mutations made by other processes are picked up too.
//!
//! ## Custom Protocol
//! Requests start with a compressed-integer command code, responses with a
//! `NEXT`/`DONE`/`ERROR` discriminator. Payloads are built from compressed
//! integers, length prefixed (optionally nullable) UTF-8 strings and typed
//! [`ColumnValue`] cells; see the [`protocol`] module.
//!
//! ## Reference Server
//! A [`TableServer`] over a pluggable [`TableStore`] (in-memory or sled
//! backed) is included so the client has something real to talk to; the
//! `tablecache-server` and `tablecache-client` executables wire it all
//! together on the command line.

pub use cache::{CachedTable, RowSource};
pub use client::TableClient;
pub use connector::Connector;
pub use error::{Result, TableError};
pub use protocol::{ColumnValue, Command, Record, ResponseCode, TableId, TableInfo};
pub use registry::{AnyTable, TableRegistry};
pub use row::{RecordRow, Row};
pub use server::{InvalidateBus, TableServer};
pub use store::{MemoryStore, SledStore, TableDef, TableStore};
pub use thread_pool::{NaiveThreadPool, RayonThreadPool, SharedQueueThreadPool, ThreadPool};

mod cache;
mod client;
mod connector;
mod error;
pub mod protocol;
mod registry;
mod row;
mod server;
mod store;
pub mod thread_pool;
