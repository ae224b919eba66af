//! The catalog context.
//!
//! Bundles the zone registry and the colocation graph, persists both to
//! the state store, and applies DDL statements. It is passed explicitly
//! to whoever hosts cluster metadata; there is no global instance.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use zonegrid_core::{PartitionId, Row, TableId};
use zonegrid_state::{IndexDef, StateStore, TableSchema, ZoneDefinition};

use crate::colocation::{ColocationGraph, EffectivePartitionFn, parents_first};
use crate::ddl::{self, Statement};
use crate::error::{CatalogResult, SchemaError, SchemaResult, ZoneError};
use crate::normalize_ident;
use crate::registry::{DEFAULT_ZONE, ZoneAlter, ZoneRegistry, ZoneSpec};

/// Result of executing one DDL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    ZoneCreated { zone: ZoneDefinition },
    ZoneExists { zone: ZoneDefinition },
    ZoneAltered { zone: ZoneDefinition, previous: ZoneDefinition },
    ZoneDropped { zone: ZoneDefinition },
    TableCreated { table: String, id: TableId, zone: String },
    TableExists { table: String },
    TableDropped { table: String, zone: String },
    IndexCreated { table: String, index: String },
    /// `IF EXISTS` / `IF NOT EXISTS` turned the statement into a no-op.
    Skipped { reason: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::ZoneCreated { zone } => write!(
                f,
                "zone {} created (replicas={}, partitions={})",
                zone.name, zone.replicas, zone.partitions
            ),
            Outcome::ZoneExists { zone } => write!(f, "zone {} already exists", zone.name),
            Outcome::ZoneAltered { zone, .. } => {
                write!(f, "zone {} altered (replicas={})", zone.name, zone.replicas)
            }
            Outcome::ZoneDropped { zone } => write!(f, "zone {} dropped", zone.name),
            Outcome::TableCreated { table, zone, .. } => {
                write!(f, "table {table} created in zone {zone}")
            }
            Outcome::TableExists { table } => write!(f, "table {table} already exists"),
            Outcome::TableDropped { table, .. } => write!(f, "table {table} dropped"),
            Outcome::IndexCreated { table, index } => {
                write!(f, "index {index} created on {table}")
            }
            Outcome::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

/// Zone and table metadata of one cluster.
pub struct Catalog {
    zones: ZoneRegistry,
    tables: RwLock<ColocationGraph>,
    /// Serialises table DDL against itself.
    ddl: Mutex<()>,
    store: Option<StateStore>,
}

impl Catalog {
    /// An empty catalog with no persistence.
    pub fn new() -> Self {
        Self {
            zones: ZoneRegistry::new(),
            tables: RwLock::new(ColocationGraph::new()),
            ddl: Mutex::new(()),
            store: None,
        }
    }

    /// Open a catalog over `store`, restoring zones and tables.
    ///
    /// Tables are re-resolved parents first, so a restored catalog routes
    /// rows exactly like the one that persisted them.
    pub fn open(store: StateStore) -> CatalogResult<Self> {
        let zones = ZoneRegistry::open(store.clone())?;
        let mut graph = ColocationGraph::new();

        for schema in parents_first(store.list_tables()?)? {
            let zone = zones
                .get_zone(&schema.zone)
                .ok_or_else(|| ZoneError::NotFound(schema.zone.clone()))?;
            let resolution = graph.resolve(&schema, &zone)?;
            zones.attach_table(&schema.zone)?;
            graph.insert(schema, resolution);
        }

        info!(
            zones = zones.list_zones().len(),
            tables = graph.len(),
            "catalog restored"
        );

        Ok(Self {
            zones,
            tables: RwLock::new(graph),
            ddl: Mutex::new(()),
            store: Some(store),
        })
    }

    pub fn zones(&self) -> &ZoneRegistry {
        &self.zones
    }

    pub fn store(&self) -> Option<&StateStore> {
        self.store.as_ref()
    }

    /// Register a table and return its id.
    ///
    /// Tables in the `DEFAULT` zone create that zone on first use. A
    /// failed registration leaves no trace in the registry or the store.
    pub fn create_table(&self, schema: TableSchema, if_not_exists: bool) -> CatalogResult<TableId> {
        self.register_table(schema, if_not_exists).map(|(id, _)| id)
    }

    fn register_table(
        &self,
        schema: TableSchema,
        if_not_exists: bool,
    ) -> CatalogResult<(TableId, bool)> {
        let _guard = self.ddl.lock();

        if let Some(existing) = self.tables.read().lookup(&schema.name) {
            if if_not_exists {
                debug!(table = %schema.name, "table exists, skipping");
                return Ok((existing.id, false));
            }
            return Err(SchemaError::AlreadyExists(schema.name).into());
        }

        let zone = match self.zones.get_zone(&schema.zone) {
            Some(zone) => zone,
            None if schema.zone == DEFAULT_ZONE => {
                self.zones.create(&ZoneSpec::default_zone(), true)?.0
            }
            None => return Err(ZoneError::NotFound(schema.zone.clone()).into()),
        };

        let resolution = self.tables.read().resolve(&schema, &zone)?;

        self.zones.attach_table(&zone.name)?;
        if let Some(store) = &self.store {
            if let Err(e) = store.put_table(&schema) {
                self.zones.detach_table(&zone.name);
                return Err(e.into());
            }
        }

        let name = schema.name.clone();
        let colocated_with = schema.colocate_with.clone();
        let id = self.tables.write().insert(schema, resolution);

        info!(
            table = %name,
            id,
            zone = %zone.name,
            colocate_with = colocated_with.as_deref().unwrap_or("-"),
            "table registered"
        );
        Ok((id, true))
    }

    /// Drop a table. Fails with `TableInUse` while other tables are
    /// colocated with it.
    pub fn drop_table(&self, name: &str, if_exists: bool) -> CatalogResult<Option<TableSchema>> {
        let name = normalize_ident(name);
        let _guard = self.ddl.lock();

        let mut graph = self.tables.write();
        if !graph.contains(&name) {
            if if_exists {
                return Ok(None);
            }
            return Err(SchemaError::NotFound(name).into());
        }

        let children = graph.children_of(&name);
        if !children.is_empty() {
            return Err(SchemaError::TableInUse {
                table: name,
                children,
            }
            .into());
        }

        if let Some(store) = &self.store {
            store.delete_table(&name)?;
        }
        let node = graph.remove(&name)?;
        drop(graph);
        self.zones.detach_table(&node.schema.zone);

        info!(table = %name, zone = %node.schema.zone, "table dropped");
        Ok(Some(node.schema))
    }

    /// Add a secondary index to a registered table.
    pub fn create_index(
        &self,
        table: &str,
        index: &str,
        columns: &[String],
        if_not_exists: bool,
    ) -> CatalogResult<bool> {
        let table = normalize_ident(table);
        let index = normalize_ident(index);
        let _guard = self.ddl.lock();

        let mut schema = self
            .get_table(&table)
            .ok_or_else(|| SchemaError::NotFound(table.clone()))?;

        if schema.indexes.iter().any(|i| i.name == index) {
            if if_not_exists {
                return Ok(false);
            }
            return Err(SchemaError::Invalid {
                table,
                reason: format!("index {index} already exists"),
            }
            .into());
        }

        let columns: Vec<String> = columns.iter().map(|c| normalize_ident(c)).collect();
        if columns.is_empty() {
            return Err(invalid(&table, format!("index {index} has no columns")).into());
        }
        if let Some(stray) = columns.iter().find(|c| schema.column(c).is_none()) {
            return Err(invalid(&table, format!("index {index} references unknown column {stray}")).into());
        }

        schema.indexes.push(IndexDef {
            name: index.clone(),
            columns,
        });
        if let Some(store) = &self.store {
            store.put_table(&schema)?;
        }
        self.tables.write().update_schema(schema);

        info!(table = %table, index = %index, "index created");
        Ok(true)
    }

    pub fn get_table(&self, name: &str) -> Option<TableSchema> {
        self.tables
            .read()
            .lookup(&normalize_ident(name))
            .map(|n| n.schema.clone())
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.tables.read().lookup(&normalize_ident(name)).map(|n| n.id)
    }

    /// All tables in registration order.
    pub fn list_tables(&self) -> Vec<TableSchema> {
        self.tables.read().tables().map(|n| n.schema.clone()).collect()
    }

    /// Tables placed in `zone`.
    pub fn tables_in_zone(&self, zone: &str) -> Vec<String> {
        let zone = normalize_ident(zone);
        self.tables
            .read()
            .tables()
            .filter(|n| n.schema.zone == zone)
            .map(|n| n.schema.name.clone())
            .collect()
    }

    /// Tables colocated directly with `name`.
    pub fn children(&self, name: &str) -> Vec<String> {
        self.tables.read().children_of(&normalize_ident(name))
    }

    /// Cached partition function of a table.
    pub fn partition_fn(&self, table: &str) -> SchemaResult<Arc<EffectivePartitionFn>> {
        let table = normalize_ident(table);
        self.tables
            .read()
            .lookup(&table)
            .map(|n| n.partition_fn.clone())
            .ok_or(SchemaError::NotFound(table))
    }

    pub fn partition_of_row(&self, row: &Row) -> SchemaResult<PartitionId> {
        Ok(self.partition_fn(&row.table)?.partition_of_row(row)?)
    }

    /// Apply one DDL statement.
    pub fn execute(&self, statement: Statement) -> CatalogResult<Outcome> {
        match statement {
            Statement::CreateZone {
                spec,
                if_not_exists,
            } => {
                let (zone, created) = self.zones.create(&spec, if_not_exists)?;
                Ok(if created {
                    Outcome::ZoneCreated { zone }
                } else {
                    Outcome::ZoneExists { zone }
                })
            }
            Statement::AlterZone {
                name,
                alter,
                if_exists,
            } => {
                let Some(previous) = self.zones.get_zone(&name) else {
                    if if_exists {
                        return Ok(skipped(format!("zone {} does not exist", normalize_ident(&name))));
                    }
                    return Err(ZoneError::NotFound(normalize_ident(&name)).into());
                };
                let zone = self.zones.alter_zone(&name, &alter)?;
                Ok(Outcome::ZoneAltered { zone, previous })
            }
            Statement::DropZone { name, if_exists } => {
                match self.zones.drop_zone(&name, if_exists)? {
                    Some(zone) => Ok(Outcome::ZoneDropped { zone }),
                    None => Ok(skipped(format!("zone {} does not exist", normalize_ident(&name)))),
                }
            }
            Statement::CreateTable {
                table,
                if_not_exists,
            } => {
                let schema = table.build()?;
                let name = schema.name.clone();
                let zone = schema.zone.clone();
                let (id, created) = self.register_table(schema, if_not_exists)?;
                Ok(if created {
                    Outcome::TableCreated {
                        table: name,
                        id,
                        zone,
                    }
                } else {
                    Outcome::TableExists { table: name }
                })
            }
            Statement::CreateIndex {
                name,
                table,
                columns,
                if_not_exists,
            } => {
                if self.create_index(&table, &name, &columns, if_not_exists)? {
                    Ok(Outcome::IndexCreated {
                        table: normalize_ident(&table),
                        index: normalize_ident(&name),
                    })
                } else {
                    Ok(skipped(format!("index {} exists", normalize_ident(&name))))
                }
            }
            Statement::DropTable { name, if_exists } => match self.drop_table(&name, if_exists)? {
                Some(schema) => Ok(Outcome::TableDropped {
                    table: schema.name,
                    zone: schema.zone,
                }),
                None => Ok(skipped(format!("table {} does not exist", normalize_ident(&name)))),
            },
        }
    }

    /// Parse and apply a script, stopping at the first failing statement.
    pub fn execute_script(&self, source: &str) -> CatalogResult<Vec<Outcome>> {
        let statements = ddl::parse(source)?;
        let mut outcomes = Vec::with_capacity(statements.len());
        for statement in statements {
            match self.execute(statement) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(error = %e, executed = outcomes.len(), "DDL script aborted");
                    return Err(e);
                }
            }
        }
        Ok(outcomes)
    }

    /// Shorthand for `ALTER ZONE name SET REPLICAS=n`.
    pub fn set_replicas(&self, zone: &str, replicas: u32) -> CatalogResult<ZoneDefinition> {
        Ok(self.zones.alter_zone(zone, &ZoneAlter::replicas(replicas))?)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

fn skipped(reason: String) -> Outcome {
    Outcome::Skipped { reason }
}

fn invalid(table: &str, reason: String) -> SchemaError {
    SchemaError::Invalid {
        table: table.to_string(),
        reason,
    }
}
