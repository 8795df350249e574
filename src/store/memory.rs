//! The concurrent in-memory table store.

use super::{check_row, TableDef, TableStore};
use crate::error::{Result, TableError};
use crate::protocol::{ColumnValue, Record, TableId, TableInfo};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

// one table: its definition, the rows, and a key -> row position map kept in
// step with the rows vector
struct TableData {
    def: TableDef,
    rows: Vec<Record>,
    by_key: HashMap<ColumnValue, usize>,
}

/// An in-memory [`TableStore`] sharded over a concurrent map; clones share
/// the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<DashMap<TableId, TableData>>,
}

impl MemoryStore {
    /// creates a store with no tables defined
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl TableStore for MemoryStore {
    fn define_table(&self, def: TableDef) -> Result<()> {
        def.validate()?;
        match self.tables.entry(def.id) {
            Entry::Occupied(_) => Err(TableError::TableExists(def.id)),
            Entry::Vacant(entry) => {
                debug!("defined table {} ({})", def.id, def.name);
                entry.insert(TableData {
                    def,
                    rows: Vec::new(),
                    by_key: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    fn tables(&self) -> Result<Vec<TableInfo>> {
        let mut infos: Vec<TableInfo> = self
            .tables
            .iter()
            .map(|entry| entry.value().def.info())
            .collect();
        infos.sort_by_key(|info| info.id);
        Ok(infos)
    }

    fn rows(&self, id: TableId) -> Result<Vec<Record>> {
        match self.tables.get(&id) {
            Some(entry) => Ok(entry.value().rows.clone()),
            None => Err(TableError::UnknownTable(id)),
        }
    }

    fn add_row(&self, id: TableId, row: Record) -> Result<Vec<TableId>> {
        let mut entry = self
            .tables
            .get_mut(&id)
            .ok_or(TableError::UnknownTable(id))?;
        let data = entry.value_mut();
        check_row(&data.def, &row)?;

        let key = row[0].clone();
        if data.by_key.contains_key(&key) {
            return Err(TableError::DuplicateKey(key.to_string()));
        }
        data.by_key.insert(key, data.rows.len());
        data.rows.push(row);
        Ok(data.def.invalidate_list())
    }

    fn remove_row(&self, id: TableId, key: &ColumnValue) -> Result<Vec<TableId>> {
        let mut entry = self
            .tables
            .get_mut(&id)
            .ok_or(TableError::UnknownTable(id))?;
        let data = entry.value_mut();

        let position = data
            .by_key
            .remove(key)
            .ok_or_else(|| TableError::KeyNotFound(key.to_string()))?;
        data.rows.swap_remove(position);
        // the row that filled the hole changed position
        if position < data.rows.len() {
            let moved_key = data.rows[position][0].clone();
            data.by_key.insert(moved_key, position);
        }
        Ok(data.def.invalidate_list())
    }

    fn update_row(&self, id: TableId, row: Record) -> Result<Vec<TableId>> {
        let mut entry = self
            .tables
            .get_mut(&id)
            .ok_or(TableError::UnknownTable(id))?;
        let data = entry.value_mut();
        check_row(&data.def, &row)?;

        let position = *data
            .by_key
            .get(&row[0])
            .ok_or_else(|| TableError::KeyNotFound(row[0].to_string()))?;
        data.rows[position] = row;
        Ok(data.def.invalidate_list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_widgets() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .define_table(TableDef::new(1, "widgets", 2).with_dependents(vec![7]))
            .unwrap();
        store
    }

    fn widget(id: i64, name: &str) -> Record {
        vec![ColumnValue::Int(id), ColumnValue::Text(name.to_string())]
    }

    #[test]
    fn define_rejects_duplicates_and_zero_columns() {
        let store = store_with_widgets();
        assert!(matches!(
            store.define_table(TableDef::new(1, "again", 2)),
            Err(TableError::TableExists(1))
        ));
        assert!(matches!(
            store.define_table(TableDef::new(2, "empty", 0)),
            Err(TableError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn add_and_list_rows() {
        let store = store_with_widgets();
        let invalidated = store.add_row(1, widget(1, "bolt")).unwrap();
        assert_eq!(invalidated, vec![1, 7]);
        store.add_row(1, widget(2, "nut")).unwrap();
        assert_eq!(store.rows(1).unwrap().len(), 2);
    }

    #[test]
    fn add_enforces_integrity() {
        let store = store_with_widgets();
        store.add_row(1, widget(1, "bolt")).unwrap();

        assert!(matches!(
            store.add_row(1, widget(1, "other")),
            Err(TableError::DuplicateKey(_))
        ));
        assert!(matches!(
            store.add_row(1, vec![ColumnValue::Int(2)]),
            Err(TableError::ColumnCount { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            store.add_row(1, vec![ColumnValue::Null, ColumnValue::Text("x".into())]),
            Err(TableError::InvalidKey(_))
        ));
        assert!(matches!(
            store.add_row(9, widget(3, "gear")),
            Err(TableError::UnknownTable(9))
        ));
    }

    #[test]
    fn update_replaces_in_place() {
        let store = store_with_widgets();
        store.add_row(1, widget(1, "bolt")).unwrap();
        store.add_row(1, widget(2, "nut")).unwrap();

        let invalidated = store.update_row(1, widget(1, "hex bolt")).unwrap();
        assert_eq!(invalidated, vec![1, 7]);
        assert_eq!(store.rows(1).unwrap().len(), 2);
        assert!(store.rows(1).unwrap().contains(&widget(1, "hex bolt")));

        assert!(matches!(
            store.update_row(1, widget(9, "ghost")),
            Err(TableError::KeyNotFound(_))
        ));
        assert!(matches!(
            store.update_row(1, vec![ColumnValue::Int(1)]),
            Err(TableError::ColumnCount { .. })
        ));
    }

    #[test]
    fn remove_keeps_key_map_consistent() {
        let store = store_with_widgets();
        for i in 1..=3 {
            store.add_row(1, widget(i, "w")).unwrap();
        }

        // removing the first row swaps the last row into its slot
        store.remove_row(1, &ColumnValue::Int(1)).unwrap();
        assert_eq!(store.rows(1).unwrap().len(), 2);
        store.remove_row(1, &ColumnValue::Int(3)).unwrap();
        store.remove_row(1, &ColumnValue::Int(2)).unwrap();
        assert!(store.rows(1).unwrap().is_empty());

        assert!(matches!(
            store.remove_row(1, &ColumnValue::Int(2)),
            Err(TableError::KeyNotFound(_))
        ));
    }

    #[test]
    fn clones_share_tables() {
        let store = store_with_widgets();
        let clone = store.clone();
        clone.add_row(1, widget(1, "bolt")).unwrap();
        assert_eq!(store.rows(1).unwrap().len(), 1);
    }
}
