//! Partitioned in-memory row storage.

use std::sync::RwLock;

use quarry_common::{QuarryError, Result};
use quarry_planner::{Row, StructField, TableSchema};

/// One physical partition of a table: static key values (one per partition
/// column) plus row data.
#[derive(Debug, Clone)]
pub struct MemPartition {
    /// Values of the table's partition columns for this partition.
    pub key_values: Row,
    /// Row data. Rows hold every column, partition keys included.
    pub rows: Vec<Row>,
}

/// In-memory table: the reference storage behind scans and inserts.
#[derive(Debug)]
pub struct MemTable {
    fields: Vec<StructField>,
    partition_cols: Vec<String>,
    data: RwLock<Vec<MemPartition>>,
}

impl MemTable {
    /// Empty table.
    pub fn new(fields: Vec<StructField>, partition_cols: Vec<String>) -> Self {
        Self {
            fields,
            partition_cols,
            data: RwLock::new(Vec::new()),
        }
    }

    /// Unpartitioned table pre-loaded with rows split into `partitions`
    /// chunks.
    pub fn with_rows(fields: Vec<StructField>, rows: Vec<Row>, partitions: usize) -> Self {
        let table = Self::new(fields, vec![]);
        let partitions = partitions.max(1);
        let chunk = rows.len().div_ceil(partitions).max(1);
        {
            let mut data = table.data.write().expect("table lock poisoned");
            for rows in rows.chunks(chunk) {
                data.push(MemPartition {
                    key_values: vec![],
                    rows: rows.to_vec(),
                });
            }
        }
        table
    }

    /// Column definitions.
    pub fn fields(&self) -> &[StructField] {
        &self.fields
    }

    /// Partition column names.
    pub fn partition_cols(&self) -> &[String] {
        &self.partition_cols
    }

    /// Catalog-facing schema.
    pub fn schema(&self) -> TableSchema {
        TableSchema {
            fields: self.fields.clone(),
            partition_cols: self.partition_cols.clone(),
        }
    }

    /// Ordinal of a column by name.
    pub fn field_index(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| {
                QuarryError::Execution(format!("unknown column '{name}' in table"))
            })
    }

    /// Snapshot of the current partitions.
    pub fn snapshot(&self) -> Vec<MemPartition> {
        self.data.read().expect("table lock poisoned").clone()
    }

    /// Append rows into the partition with the given key values, creating it
    /// if absent.
    pub fn append(&self, key_values: Row, rows: Vec<Row>) -> Result<()> {
        for row in &rows {
            if row.len() != self.fields.len() {
                return Err(QuarryError::Execution(format!(
                    "row arity {} does not match table arity {}",
                    row.len(),
                    self.fields.len()
                )));
            }
        }
        let mut data = self.data.write().expect("table lock poisoned");
        match data.iter_mut().find(|p| p.key_values == key_values) {
            Some(partition) => partition.rows.extend(rows),
            None => data.push(MemPartition { key_values, rows }),
        }
        Ok(())
    }
}
