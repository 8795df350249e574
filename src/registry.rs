//! Dispatch of invalidate lists to registered caches.

use crate::cache::CachedTable;
use crate::protocol::TableId;
use crate::row::Row;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

/// An object-safe view of a cached table, enough to route an invalidate list.
pub trait AnyTable: Send + Sync + 'static {
    /// the id of the table this cache mirrors
    fn table_id(&self) -> TableId;

    /// drops the cache's snapshot
    fn invalidate(&self);

    /// upcast used by [`crate::Connector`] to recover the typed cache
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<R: Row> AnyTable for CachedTable<R> {
    fn table_id(&self) -> TableId {
        CachedTable::table_id(self)
    }

    fn invalidate(&self) {
        CachedTable::invalidate(self)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A concurrent map of the caches held by one connector, keyed by table id.
///
/// Invalidate lists name every table a mutation touched; tables the client
/// never registered a cache for are silently skipped.
#[derive(Default)]
pub struct TableRegistry {
    tables: DashMap<TableId, Arc<dyn AnyTable>>,
}

impl TableRegistry {
    /// creates an empty registry
    pub fn new() -> TableRegistry {
        TableRegistry::default()
    }

    /// registers a cache, replacing any cache previously held for its id
    pub fn register(&self, table: Arc<dyn AnyTable>) {
        self.tables.insert(table.table_id(), table);
    }

    /// the cache registered for `id`, if any
    pub fn get(&self, id: TableId) -> Option<Arc<dyn AnyTable>> {
        self.tables.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Applies an invalidate list: every registered cache named in `ids` is
    /// dropped.
    pub fn invalidate_ids(&self, ids: &[TableId]) {
        for &id in ids {
            match self.tables.get(&id) {
                Some(entry) => entry.value().invalidate(),
                None => debug!(table_id = id, "invalidate for unregistered table"),
            }
        }
    }

    /// drops every registered cache, used when a connection is rebuilt
    pub fn invalidate_all(&self) {
        for entry in self.tables.iter() {
            entry.value().invalidate();
        }
    }

    /// the number of registered caches
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// whether no cache is registered
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
