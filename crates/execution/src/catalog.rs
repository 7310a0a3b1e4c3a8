//! In-memory catalog backing the planner's catalog collaborator.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use quarry_common::{QuarryError, Result};
use quarry_planner::{Catalog, TableSchema};

use crate::table::MemTable;

/// Name -> table registry. Read-only during query execution; tables are
/// registered at session setup.
#[derive(Default)]
pub struct MemoryCatalog {
    tables: RwLock<HashMap<String, Arc<MemTable>>>,
}

impl MemoryCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a table.
    pub fn register_table(&self, name: impl Into<String>, table: MemTable) -> Arc<MemTable> {
        let table = Arc::new(table);
        self.tables
            .write()
            .expect("catalog lock poisoned")
            .insert(name.into(), Arc::clone(&table));
        table
    }

    /// Resolve a table by name.
    pub fn table(&self, name: &str) -> Result<Arc<MemTable>> {
        self.tables
            .read()
            .expect("catalog lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| QuarryError::RelationNotFound(name.to_string()))
    }
}

impl Catalog for MemoryCatalog {
    fn lookup_relation(&self, name: &str) -> Result<TableSchema> {
        Ok(self.table(name)?.schema())
    }
}
