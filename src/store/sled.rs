//! The sled-backed persistent table store.
//!
//! Definitions live in a `schema` tree keyed by big-endian table id; each
//! table's rows live in their own `rows.<id>` tree keyed by the JSON form of
//! the key value. Records are JSON-serialized at rest, the wire codec is only
//! used on sockets.

use super::{check_row, TableDef, TableStore};
use crate::error::{Result, TableError};
use crate::protocol::{ColumnValue, Record, TableId, TableInfo};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA_TREE: &str = "schema";

/// A persistent [`TableStore`] over a [`sled`] database; clones share the
/// same database handle.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// opens (or creates) the database under the given directory
    pub fn open(path: &Path) -> Result<SledStore> {
        let db = sled::open(path)?;
        info!("opened sled table store at {:?}", path);
        Ok(SledStore { db })
    }

    fn schema(&self) -> Result<sled::Tree> {
        Ok(self.db.open_tree(SCHEMA_TREE)?)
    }

    fn rows_tree(&self, id: TableId) -> Result<sled::Tree> {
        Ok(self.db.open_tree(format!("rows.{}", id))?)
    }

    fn def(&self, id: TableId) -> Result<TableDef> {
        let bytes = self
            .schema()?
            .get(id.to_be_bytes())?
            .ok_or(TableError::UnknownTable(id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl TableStore for SledStore {
    fn define_table(&self, def: TableDef) -> Result<()> {
        def.validate()?;
        let schema = self.schema()?;
        if schema.get(def.id.to_be_bytes())?.is_some() {
            return Err(TableError::TableExists(def.id));
        }
        schema.insert(def.id.to_be_bytes(), serde_json::to_vec(&def)?)?;
        self.db.flush()?;
        debug!("defined table {} ({})", def.id, def.name);
        Ok(())
    }

    fn tables(&self) -> Result<Vec<TableInfo>> {
        let mut infos = Vec::new();
        // big-endian keys keep the iteration ordered by id
        for entry in self.schema()?.iter() {
            let (_, bytes) = entry?;
            let def: TableDef = serde_json::from_slice(&bytes)?;
            infos.push(def.info());
        }
        Ok(infos)
    }

    fn rows(&self, id: TableId) -> Result<Vec<Record>> {
        self.def(id)?;
        let mut rows = Vec::new();
        for entry in self.rows_tree(id)?.iter() {
            let (_, bytes) = entry?;
            rows.push(serde_json::from_slice(&bytes)?);
        }
        Ok(rows)
    }

    fn add_row(&self, id: TableId, row: Record) -> Result<Vec<TableId>> {
        let def = self.def(id)?;
        check_row(&def, &row)?;

        let tree = self.rows_tree(id)?;
        let key_bytes = serde_json::to_vec(&row[0])?;
        if tree.get(&key_bytes)?.is_some() {
            return Err(TableError::DuplicateKey(row[0].to_string()));
        }
        tree.insert(key_bytes, serde_json::to_vec(&row)?)?;
        self.db.flush()?;
        Ok(def.invalidate_list())
    }

    fn remove_row(&self, id: TableId, key: &ColumnValue) -> Result<Vec<TableId>> {
        let def = self.def(id)?;
        let tree = self.rows_tree(id)?;
        let key_bytes = serde_json::to_vec(key)?;
        if tree.remove(key_bytes)?.is_none() {
            return Err(TableError::KeyNotFound(key.to_string()));
        }
        self.db.flush()?;
        Ok(def.invalidate_list())
    }

    fn update_row(&self, id: TableId, row: Record) -> Result<Vec<TableId>> {
        let def = self.def(id)?;
        check_row(&def, &row)?;

        let tree = self.rows_tree(id)?;
        let key_bytes = serde_json::to_vec(&row[0])?;
        if tree.get(&key_bytes)?.is_none() {
            return Err(TableError::KeyNotFound(row[0].to_string()));
        }
        tree.insert(key_bytes, serde_json::to_vec(&row)?)?;
        self.db.flush()?;
        Ok(def.invalidate_list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn widget(id: i64, name: &str) -> Record {
        vec![ColumnValue::Int(id), ColumnValue::Text(name.to_string())]
    }

    #[test]
    fn rows_survive_a_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store
                .define_table(TableDef::new(1, "widgets", 2).with_dependents(vec![4]))
                .unwrap();
            let invalidated = store.add_row(1, widget(1, "bolt")).unwrap();
            assert_eq!(invalidated, vec![1, 4]);
        }

        let store = SledStore::open(dir.path()).unwrap();
        let tables = store.tables().unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "widgets");
        assert_eq!(store.rows(1).unwrap(), vec![widget(1, "bolt")]);
        // the definition persisted too
        assert!(matches!(
            store.define_table(TableDef::new(1, "widgets", 2)),
            Err(TableError::TableExists(1))
        ));
    }

    #[test]
    fn integrity_checks_match_the_memory_store() {
        let dir = TempDir::new().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        store.define_table(TableDef::new(1, "widgets", 2)).unwrap();
        store.add_row(1, widget(1, "bolt")).unwrap();

        assert!(matches!(
            store.add_row(1, widget(1, "other")),
            Err(TableError::DuplicateKey(_))
        ));
        assert!(matches!(
            store.add_row(1, vec![ColumnValue::Int(2)]),
            Err(TableError::ColumnCount { .. })
        ));
        assert!(matches!(
            store.remove_row(1, &ColumnValue::Int(9)),
            Err(TableError::KeyNotFound(_))
        ));
        assert!(matches!(
            store.rows(3),
            Err(TableError::UnknownTable(3))
        ));

        store.update_row(1, widget(1, "hex bolt")).unwrap();
        assert_eq!(store.rows(1).unwrap(), vec![widget(1, "hex bolt")]);
        assert!(matches!(
            store.update_row(1, widget(9, "ghost")),
            Err(TableError::KeyNotFound(_))
        ));

        store.remove_row(1, &ColumnValue::Int(1)).unwrap();
        assert!(store.rows(1).unwrap().is_empty());
    }
}
