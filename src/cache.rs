//! The client-side cached table.
//!
//! [`CachedTable`] holds a full in-memory snapshot of one server-side table.
//! The snapshot is loaded lazily from a [`RowSource`] on first access and
//! dropped wholesale by [`CachedTable::invalidate`]; there is no partial
//! invalidation, no eviction and no size bound. Per-column unique and indexed
//! hash maps are derived from the snapshot on the first lookup that needs
//! them, so a table that is only ever scanned never pays for index builds,
//! and an invalidated table rebuilds only the maps that are actually used
//! again.

use crate::error::{Result, TableError};
use crate::protocol::{ColumnValue, TableId};
use crate::row::Row;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tracing::debug;

/// The loader seam of a [`CachedTable`].
///
/// The connector implements this with a network fetch; tests implement it
/// with canned data.
pub trait RowSource<R: Row>: Send + Sync + 'static {
    /// produces the complete current contents of the table
    fn load(&self) -> Result<Vec<R>>;
}

impl<R, F> RowSource<R> for F
where
    R: Row,
    F: Fn() -> Result<Vec<R>> + Send + Sync + 'static,
{
    fn load(&self) -> Result<Vec<R>> {
        self()
    }
}

// Everything derived from one load lives together so that an invalidation
// drops the snapshot and every map built from it as a unit. A lookup can
// therefore never observe an index built from a previous snapshot.
struct Snapshot<R: Row> {
    rows: Arc<Vec<Arc<R>>>,
    by_key: HashMap<R::Key, Arc<R>>,
    unique: HashMap<usize, Arc<HashMap<ColumnValue, Arc<R>>>>,
    indexed: HashMap<usize, Arc<HashMap<ColumnValue, Vec<Arc<R>>>>>,
}

struct CacheState<R: Row> {
    snapshot: Option<Snapshot<R>>,
    loads: u64,
}

/// A generic client-side full-table cache with lazy index construction.
pub struct CachedTable<R: Row> {
    table_id: TableId,
    source: Box<dyn RowSource<R>>,
    state: RwLock<CacheState<R>>,
}

impl<R: Row> CachedTable<R> {
    /// creates an unloaded cache for the table identified by `table_id`,
    /// backed by the given `source`
    pub fn new<S: RowSource<R>>(table_id: TableId, source: S) -> CachedTable<R> {
        CachedTable {
            table_id,
            source: Box::new(source),
            state: RwLock::new(CacheState {
                snapshot: None,
                loads: 0,
            }),
        }
    }

    /// the id of the table this cache mirrors
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Returns the full snapshot, loading it from the source if absent.
    pub fn rows(&self) -> Result<Arc<Vec<Arc<R>>>> {
        if let Some(snapshot) = &self.state.read().expect("cache lock poisoned").snapshot {
            return Ok(Arc::clone(&snapshot.rows));
        }
        let mut state = self.state.write().expect("cache lock poisoned");
        let snapshot = Self::loaded(&mut state, self.table_id, self.source.as_ref())?;
        Ok(Arc::clone(&snapshot.rows))
    }

    /// Looks the row with the given key up through the by-key map.
    pub fn get(&self, key: &R::Key) -> Result<Option<Arc<R>>> {
        if let Some(snapshot) = &self.state.read().expect("cache lock poisoned").snapshot {
            return Ok(snapshot.by_key.get(key).cloned());
        }
        let mut state = self.state.write().expect("cache lock poisoned");
        let snapshot = Self::loaded(&mut state, self.table_id, self.source.as_ref())?;
        Ok(snapshot.by_key.get(key).cloned())
    }

    /// Looks a row up by a unique column value.
    ///
    /// The per-column unique map is built on the first lookup after a
    /// (re)load. `Null` is never indexed, so a `Null` probe returns `None`
    /// without touching the maps.
    ///
    /// # Errors
    /// returns [`TableError::DuplicateUnique`] if two rows carry the same
    /// non-null value in `column`
    pub fn unique_row(&self, column: usize, value: &ColumnValue) -> Result<Option<Arc<R>>> {
        if value.is_null() {
            return Ok(None);
        }
        if let Some(snapshot) = &self.state.read().expect("cache lock poisoned").snapshot {
            if let Some(index) = snapshot.unique.get(&column) {
                return Ok(index.get(value).cloned());
            }
        }
        let mut state = self.state.write().expect("cache lock poisoned");
        let snapshot = Self::loaded(&mut state, self.table_id, self.source.as_ref())?;
        if !snapshot.unique.contains_key(&column) {
            let index = build_unique(&snapshot.rows, column)?;
            snapshot.unique.insert(column, Arc::new(index));
        }
        Ok(snapshot.unique[&column].get(value).cloned())
    }

    /// Returns every row carrying `value` in an indexed (non-unique) column.
    ///
    /// The per-column multimap is built on the first lookup after a (re)load;
    /// values that appear in no row yield an empty vector, as does a `Null`
    /// probe.
    pub fn indexed_rows(&self, column: usize, value: &ColumnValue) -> Result<Vec<Arc<R>>> {
        if value.is_null() {
            return Ok(Vec::new());
        }
        if let Some(snapshot) = &self.state.read().expect("cache lock poisoned").snapshot {
            if let Some(index) = snapshot.indexed.get(&column) {
                return Ok(index.get(value).cloned().unwrap_or_default());
            }
        }
        let mut state = self.state.write().expect("cache lock poisoned");
        let snapshot = Self::loaded(&mut state, self.table_id, self.source.as_ref())?;
        if !snapshot.indexed.contains_key(&column) {
            let index = build_indexed(&snapshot.rows, column);
            snapshot.indexed.insert(column, Arc::new(index));
        }
        Ok(snapshot.indexed[&column].get(value).cloned().unwrap_or_default())
    }

    /// Drops the snapshot and every derived map. The next access retries the
    /// whole cache load. Invalidating an unloaded table is a no-op.
    pub fn invalidate(&self) {
        let mut state = self.state.write().expect("cache lock poisoned");
        if state.snapshot.take().is_some() {
            debug!(table_id = self.table_id, "cache invalidated");
        }
    }

    /// whether a snapshot is currently held
    pub fn is_loaded(&self) -> bool {
        self.state
            .read()
            .expect("cache lock poisoned")
            .snapshot
            .is_some()
    }

    /// the number of rows in the snapshot, loading it if absent
    pub fn len(&self) -> Result<usize> {
        Ok(self.rows()?.len())
    }

    /// whether the table currently holds no rows, loading it if absent
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.rows()?.is_empty())
    }

    /// how many times the source has been loaded over this cache's lifetime
    pub fn load_count(&self) -> u64 {
        self.state.read().expect("cache lock poisoned").loads
    }

    // Guarantees a snapshot under the held write lock, loading from the
    // source if needed. The source call happens with the lock held: a reload
    // is an all-or-nothing event and concurrent readers wait for it.
    fn loaded<'a>(
        state: &'a mut RwLockWriteGuard<'_, CacheState<R>>,
        table_id: TableId,
        source: &dyn RowSource<R>,
    ) -> Result<&'a mut Snapshot<R>> {
        if state.snapshot.is_none() {
            let rows: Vec<Arc<R>> = source.load()?.into_iter().map(Arc::new).collect();
            let mut by_key = HashMap::with_capacity(rows.len());
            for row in &rows {
                if by_key.insert(row.key(), Arc::clone(row)).is_some() {
                    return Err(TableError::DuplicateUnique {
                        column: 0,
                        value: row.column(0).to_string(),
                    });
                }
            }
            state.loads += 1;
            debug!(table_id, rows = rows.len(), loads = state.loads, "cache loaded");
            state.snapshot = Some(Snapshot {
                rows: Arc::new(rows),
                by_key,
                unique: HashMap::new(),
                indexed: HashMap::new(),
            });
        }
        Ok(state.snapshot.as_mut().expect("snapshot just ensured"))
    }
}

fn build_unique<R: Row>(
    rows: &[Arc<R>],
    column: usize,
) -> Result<HashMap<ColumnValue, Arc<R>>> {
    let mut index = HashMap::with_capacity(rows.len());
    for row in rows {
        let value = row.column(column);
        if value.is_null() {
            continue;
        }
        if index.insert(value, Arc::clone(row)).is_some() {
            return Err(TableError::DuplicateUnique {
                column,
                value: row.column(column).to_string(),
            });
        }
    }
    Ok(index)
}

fn build_indexed<R: Row>(rows: &[Arc<R>], column: usize) -> HashMap<ColumnValue, Vec<Arc<R>>> {
    let mut index: HashMap<ColumnValue, Vec<Arc<R>>> = HashMap::new();
    for row in rows {
        let value = row.column(column);
        if value.is_null() {
            continue;
        }
        index.entry(value).or_default().push(Arc::clone(row));
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Record;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Widget {
        id: i64,
        name: String,
        shelf: i64,
    }

    impl Widget {
        fn new(id: i64, name: &str, shelf: i64) -> Widget {
            Widget {
                id,
                name: name.to_string(),
                shelf,
            }
        }
    }

    impl Row for Widget {
        type Key = i64;

        fn key(&self) -> i64 {
            self.id
        }

        fn from_record(record: Record) -> Result<Widget> {
            match record.as_slice() {
                [ColumnValue::Int(id), ColumnValue::Text(name), ColumnValue::Int(shelf)] => {
                    Ok(Widget {
                        id: *id,
                        name: name.clone(),
                        shelf: *shelf,
                    })
                }
                other => Err(TableError::Protocol(format!("bad widget record: {:?}", other))),
            }
        }

        fn to_record(&self) -> Record {
            vec![
                ColumnValue::Int(self.id),
                ColumnValue::Text(self.name.clone()),
                ColumnValue::Int(self.shelf),
            ]
        }

        fn column(&self, index: usize) -> ColumnValue {
            match index {
                0 => ColumnValue::Int(self.id),
                1 => ColumnValue::Text(self.name.clone()),
                2 => ColumnValue::Int(self.shelf),
                _ => ColumnValue::Null,
            }
        }
    }

    // backing data for a closure RowSource that counts loads and can change
    // its data between loads
    struct FakeSource {
        data: Mutex<Vec<Widget>>,
        loads: AtomicUsize,
    }

    impl FakeSource {
        fn new(data: Vec<Widget>) -> Arc<FakeSource> {
            Arc::new(FakeSource {
                data: Mutex::new(data),
                loads: AtomicUsize::new(0),
            })
        }

        fn replace(&self, data: Vec<Widget>) {
            *self.data.lock().unwrap() = data;
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }

        fn load_rows(&self) -> Result<Vec<Widget>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.data.lock().unwrap().clone())
        }
    }

    fn table_over(source: &Arc<FakeSource>) -> CachedTable<Widget> {
        let source = Arc::clone(source);
        CachedTable::new(1, move || source.load_rows())
    }

    fn widgets() -> Vec<Widget> {
        vec![
            Widget::new(1, "bolt", 10),
            Widget::new(2, "nut", 10),
            Widget::new(3, "gear", 20),
        ]
    }

    #[test]
    fn load_is_lazy_and_cached() {
        let source = FakeSource::new(widgets());
        let table = table_over(&source);
        assert!(!table.is_loaded());
        assert_eq!(source.loads(), 0);

        assert_eq!(table.rows().unwrap().len(), 3);
        assert_eq!(table.rows().unwrap().len(), 3);
        assert_eq!(source.loads(), 1);
        assert_eq!(table.load_count(), 1);
        assert!(table.is_loaded());
    }

    #[test]
    fn get_by_key() {
        let table = table_over(&FakeSource::new(widgets()));
        assert_eq!(table.get(&2).unwrap().unwrap().name, "nut");
        assert!(table.get(&9).unwrap().is_none());
    }

    #[test]
    fn unique_lookup_builds_lazily() {
        let source = FakeSource::new(widgets());
        let table = table_over(&source);

        let row = table
            .unique_row(1, &ColumnValue::Text("gear".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(row.id, 3);
        assert!(table
            .unique_row(1, &ColumnValue::Text("cog".to_string()))
            .unwrap()
            .is_none());
        assert!(table.unique_row(1, &ColumnValue::Null).unwrap().is_none());
        // the index build did not trigger a second source load
        assert_eq!(source.loads(), 1);
    }

    #[test]
    fn duplicate_unique_value_is_an_error() {
        let table = table_over(&FakeSource::new(vec![
            Widget::new(1, "bolt", 10),
            Widget::new(2, "bolt", 11),
        ]));
        match table.unique_row(1, &ColumnValue::Text("bolt".to_string())) {
            Err(TableError::DuplicateUnique { column: 1, .. }) => {}
            other => panic!("expected duplicate unique error, got {:?}", other),
        }
        // the snapshot itself stays valid
        assert_eq!(table.len().unwrap(), 2);
    }

    #[test]
    fn indexed_lookup_groups_rows() {
        let table = table_over(&FakeSource::new(widgets()));
        let shelf10 = table.indexed_rows(2, &ColumnValue::Int(10)).unwrap();
        assert_eq!(shelf10.len(), 2);
        assert!(table.indexed_rows(2, &ColumnValue::Int(99)).unwrap().is_empty());
        assert!(table.indexed_rows(2, &ColumnValue::Null).unwrap().is_empty());
    }

    #[test]
    fn invalidate_drops_snapshot_and_indexes() {
        let source = FakeSource::new(widgets());
        let table = table_over(&source);

        table.indexed_rows(2, &ColumnValue::Int(10)).unwrap();
        assert_eq!(source.loads(), 1);

        source.replace(vec![Widget::new(4, "cam", 10)]);
        table.invalidate();
        assert!(!table.is_loaded());

        // next access reloads and rebuilds the index over the new snapshot
        let shelf10 = table.indexed_rows(2, &ColumnValue::Int(10)).unwrap();
        assert_eq!(shelf10.len(), 1);
        assert_eq!(shelf10[0].id, 4);
        assert_eq!(source.loads(), 2);
    }

    #[test]
    fn invalidate_unloaded_is_a_noop() {
        let source = FakeSource::new(widgets());
        let table = table_over(&source);
        table.invalidate();
        assert_eq!(source.loads(), 0);
    }

    #[test]
    fn failed_load_leaves_table_unloaded() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let table: CachedTable<Widget> = CachedTable::new(1, move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TableError::Server("not yet".to_string()))
            } else {
                Ok(widgets())
            }
        });

        assert!(table.rows().is_err());
        assert!(!table.is_loaded());
        // the retry goes back to the source
        assert_eq!(table.rows().unwrap().len(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_table_is_valid() {
        let table: CachedTable<Widget> = table_over(&FakeSource::new(vec![]));
        assert!(table.is_empty().unwrap());
        assert!(table.get(&1).unwrap().is_none());
        assert!(table
            .unique_row(1, &ColumnValue::Text("x".to_string()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn concurrent_readers_share_one_load() {
        let source = FakeSource::new(widgets());
        let table = table_over(&source);

        crossbeam_utils::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|_| {
                    for _ in 0..50 {
                        assert_eq!(table.rows().unwrap().len(), 3);
                        assert!(table
                            .unique_row(1, &ColumnValue::Text("nut".to_string()))
                            .unwrap()
                            .is_some());
                    }
                });
            }
        })
        .unwrap();
        assert_eq!(source.loads(), 1);
    }
}
