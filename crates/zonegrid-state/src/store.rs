//! StateStore — redb-backed metadata persistence for ZoneGrid.
//!
//! Provides typed CRUD operations over zones, tables, partition
//! assignments and nodes. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ZONES).map_err(map_err!(Table))?;
        txn.open_table(TABLES).map_err(map_err!(Table))?;
        txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON record access ─────────────────────────────────

    fn put_record<T: Serialize>(&self, table: JsonTable, key: &str, record: &T) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_record<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List records whose key starts with `prefix` (empty prefix = all).
    fn list_records<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let record: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    fn delete_record(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Zones ──────────────────────────────────────────────────────

    /// Insert or update a zone definition.
    pub fn put_zone(&self, zone: &ZoneDefinition) -> StateResult<()> {
        self.put_record(ZONES, &zone.name, zone)?;
        debug!(zone = %zone.name, "zone stored");
        Ok(())
    }

    pub fn get_zone(&self, name: &str) -> StateResult<Option<ZoneDefinition>> {
        self.get_record(ZONES, name)
    }

    pub fn list_zones(&self) -> StateResult<Vec<ZoneDefinition>> {
        self.list_records(ZONES, "")
    }

    /// Delete a zone by name. Returns true if it existed.
    pub fn delete_zone(&self, name: &str) -> StateResult<bool> {
        let existed = self.delete_record(ZONES, name)?;
        debug!(zone = %name, existed, "zone deleted");
        Ok(existed)
    }

    // ── Tables ─────────────────────────────────────────────────────

    /// Insert or update a table schema.
    pub fn put_table(&self, schema: &TableSchema) -> StateResult<()> {
        self.put_record(TABLES, &schema.name, schema)?;
        debug!(table = %schema.name, "table schema stored");
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> StateResult<Option<TableSchema>> {
        self.get_record(TABLES, name)
    }

    pub fn list_tables(&self) -> StateResult<Vec<TableSchema>> {
        self.list_records(TABLES, "")
    }

    /// Delete a table schema by name. Returns true if it existed.
    pub fn delete_table(&self, name: &str) -> StateResult<bool> {
        self.delete_record(TABLES, name)
    }

    // ── Assignments ────────────────────────────────────────────────

    /// Insert or update one partition's assignment.
    pub fn put_assignment(&self, assignment: &PartitionAssignment) -> StateResult<()> {
        self.put_record(ASSIGNMENTS, &assignment.table_key(), assignment)
    }

    /// Insert or update many assignments in a single transaction.
    pub fn put_assignments(&self, assignments: &[PartitionAssignment]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            for a in assignments {
                let value = serde_json::to_vec(a).map_err(map_err!(Serialize))?;
                table
                    .insert(a.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = assignments.len(), "assignments stored");
        Ok(())
    }

    pub fn get_assignment(
        &self,
        zone: &str,
        partition: u32,
    ) -> StateResult<Option<PartitionAssignment>> {
        self.get_record(ASSIGNMENTS, &assignment_key(zone, partition))
    }

    /// List all assignments of a zone, ordered by partition.
    pub fn list_assignments_for_zone(&self, zone: &str) -> StateResult<Vec<PartitionAssignment>> {
        let mut results: Vec<PartitionAssignment> =
            self.list_records(ASSIGNMENTS, &format!("{zone}:"))?;
        results.sort_by_key(|a| a.partition);
        Ok(results)
    }

    /// Delete all assignments of a zone. Returns number deleted.
    pub fn delete_assignments_for_zone(&self, zone: &str) -> StateResult<u32> {
        let prefix = format!("{zone}:");
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect()
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%zone, count, "assignments deleted");
        Ok(count)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node info.
    pub fn put_node(&self, node: &NodeInfo) -> StateResult<()> {
        self.put_record(NODES, &node.id, node)
    }

    pub fn get_node(&self, node_id: &str) -> StateResult<Option<NodeInfo>> {
        self.get_record(NODES, node_id)
    }

    pub fn list_nodes(&self) -> StateResult<Vec<NodeInfo>> {
        self.list_records(NODES, "")
    }

    /// Delete a node by ID. Returns true if it existed.
    pub fn delete_node(&self, node_id: &str) -> StateResult<bool> {
        self.delete_record(NODES, node_id)
    }
}
