//! The high level client handle: a shared connection plus the registry of
//! cached tables fed by invalidate lists.

use crate::cache::CachedTable;
use crate::client::TableClient;
use crate::error::Result;
use crate::protocol::{ColumnValue, Record, TableId, TableInfo};
use crate::registry::TableRegistry;
use crate::row::Row;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// `Connector` is the application facing entry point of the client side.
///
/// Clones are cheap and share one mutexed [`TableClient`] plus one
/// [`TableRegistry`]. Cached tables obtained through [`Connector::cached`]
/// load themselves over the shared connection and are registered for
/// invalidation. Mutations apply the server's invalidate list to the registry
/// *before* returning, so the mutating client observes its own writes on the
/// next cache access; other processes converge through
/// [`Connector::spawn_listener`].
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    addr: SocketAddr,
    client: Mutex<TableClient>,
    registry: TableRegistry,
}

impl Connector {
    /// connects to the table server at `addr`
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Connector> {
        let client = TableClient::connect(addr)?;
        let addr = client.peer_addr();
        Ok(Connector {
            inner: Arc::new(ConnectorInner {
                addr,
                client: Mutex::new(client),
                registry: TableRegistry::new(),
            }),
        })
    }

    /// the registry holding this connector's cached tables
    pub fn registry(&self) -> &TableRegistry {
        &self.inner.registry
    }

    /// fetches the schema rows of every defined table
    pub fn list_tables(&self) -> Result<Vec<TableInfo>> {
        self.client().list_tables()
    }

    /// fetches the full contents of one table, bypassing any cache
    pub fn get_table(&self, table_id: TableId) -> Result<Vec<Record>> {
        self.client().get_table(table_id)
    }

    /// Returns the cached table of type `R` for `table_id`, creating and
    /// registering it on first use.
    ///
    /// The same `(table_id, R)` pair always yields the same cache. Asking for
    /// an id that was previously cached under a different row type replaces
    /// the registration; the older cache keeps working but no longer receives
    /// invalidations.
    pub fn cached<R: Row>(&self, table_id: TableId) -> Arc<CachedTable<R>> {
        if let Some(existing) = self.inner.registry.get(table_id) {
            match existing.as_any().downcast::<CachedTable<R>>() {
                Ok(typed) => return typed,
                Err(_) => warn!(
                    table_id,
                    "cached table re-registered under a different row type"
                ),
            }
        }
        // a Weak keeps the registry -> table -> connector chain from forming
        // a reference cycle
        let inner = Arc::downgrade(&self.inner);
        let table = Arc::new(CachedTable::new(table_id, move || -> Result<Vec<R>> {
            let records = fetch_records(&inner, table_id)?;
            records.into_iter().map(R::from_record).collect()
        }));
        self.inner.registry.register(table.clone());
        table
    }

    /// Appends a row and applies the resulting invalidate list to the
    /// registry.
    ///
    /// ## Returns
    /// the invalidate list reported by the server
    pub fn add_row(&self, table_id: TableId, row: &[ColumnValue]) -> Result<Vec<TableId>> {
        let invalidated = self.client().add_row(table_id, row)?;
        self.inner.registry.invalidate_ids(&invalidated);
        Ok(invalidated)
    }

    /// Removes a row by key and applies the resulting invalidate list to the
    /// registry.
    ///
    /// ## Returns
    /// the invalidate list reported by the server
    pub fn remove_row(&self, table_id: TableId, key: &ColumnValue) -> Result<Vec<TableId>> {
        let invalidated = self.client().remove_row(table_id, key)?;
        self.inner.registry.invalidate_ids(&invalidated);
        Ok(invalidated)
    }

    /// Replaces a row (matched by its key column) and applies the resulting
    /// invalidate list to the registry.
    ///
    /// ## Returns
    /// the invalidate list reported by the server
    pub fn update_row(&self, table_id: TableId, row: &[ColumnValue]) -> Result<Vec<TableId>> {
        let invalidated = self.client().update_row(table_id, row)?;
        self.inner.registry.invalidate_ids(&invalidated);
        Ok(invalidated)
    }

    /// Spawns a background thread that subscribes to server pushed invalidate
    /// lists on a dedicated connection and applies them to this connector's
    /// registry.
    ///
    /// The thread exits, with a warning in the log, when the connection dies;
    /// there is no automatic reconnect. Callers that rebuild a connection
    /// should also call [`TableRegistry::invalidate_all`] so stale caches are
    /// dropped.
    pub fn spawn_listener(&self) -> Result<JoinHandle<()>> {
        let client = TableClient::connect(self.inner.addr)?;
        let connector = self.clone();
        let handle = thread::Builder::new()
            .name("invalidate-listener".to_string())
            .spawn(move || {
                let result = client.listen(|ids| {
                    connector.inner.registry.invalidate_ids(ids);
                });
                match result {
                    Ok(()) => debug!("invalidate listener stopped"),
                    Err(e) => warn!("invalidate listener exited: {}", e),
                }
            })?;
        Ok(handle)
    }

    fn client(&self) -> std::sync::MutexGuard<'_, TableClient> {
        self.inner.client.lock().expect("client lock poisoned")
    }
}

fn fetch_records(inner: &Weak<ConnectorInner>, table_id: TableId) -> Result<Vec<Record>> {
    let inner = inner.upgrade().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotConnected, "connector was dropped")
    })?;
    let records = inner
        .client
        .lock()
        .expect("client lock poisoned")
        .get_table(table_id)?;
    Ok(records)
}
