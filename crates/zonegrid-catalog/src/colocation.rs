//! Colocation planner.
//!
//! Tables form a DAG through their `colocate_with` references. The graph
//! is an arena of [`TableNode`]s addressed by [`TableId`]; each node keeps
//! the partition function resolved when the table was registered, so row
//! routing never walks the chain.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use zonegrid_core::{ColumnType, PartitionId, Row, TableId, Value};
use zonegrid_placement::{PartitionError, PartitionResult, key_hash, partition_for_hash};
use zonegrid_state::{TableSchema, ZoneDefinition};

use crate::error::{SchemaError, SchemaResult};

/// Partition function of one table, resolved through its colocation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectivePartitionFn {
    /// Table at the top of the chain.
    pub root_table: String,
    pub zone: String,
    pub partitions: u32,
    /// Positions within this table's primary key, in the root's
    /// colocation order.
    pub key_positions: Vec<usize>,
    pub key_types: Vec<ColumnType>,
    /// Column names at `key_positions`.
    pub key_columns: Vec<String>,
}

impl EffectivePartitionFn {
    /// Select the colocation components of a primary-key tuple.
    pub fn colocation_values(&self, primary_key: &[Value]) -> PartitionResult<Vec<Value>> {
        self.key_positions
            .iter()
            .zip(&self.key_types)
            .map(|(&pos, ty)| {
                let value = primary_key.get(pos).ok_or_else(|| {
                    PartitionError::InvalidKey(format!(
                        "key tuple has {} components, colocation needs position {pos}",
                        primary_key.len()
                    ))
                })?;
                if !value.is_null() && !value.fits(*ty) {
                    return Err(PartitionError::InvalidKey(format!(
                        "key component {pos} is {value}, expected {ty}"
                    )));
                }
                Ok(value.clone())
            })
            .collect()
    }

    pub fn partition_of_key(&self, primary_key: &[Value]) -> PartitionResult<PartitionId> {
        let values = self.colocation_values(primary_key)?;
        partition_for_hash(key_hash(&values)?, self.partitions)
    }

    pub fn partition_of_row(&self, row: &Row) -> PartitionResult<PartitionId> {
        self.partition_of_key(&row.key)
    }
}

/// One registered table.
#[derive(Debug, Clone)]
pub struct TableNode {
    pub id: TableId,
    pub schema: TableSchema,
    pub parent: Option<TableId>,
    pub children: Vec<TableId>,
    pub partition_fn: Arc<EffectivePartitionFn>,
}

/// Arena of registered tables.
#[derive(Debug, Default)]
pub struct ColocationGraph {
    nodes: Vec<Option<TableNode>>,
    by_name: HashMap<String, TableId>,
}

/// Outcome of resolving a schema against the graph.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub parent: Option<TableId>,
    pub partition_fn: EffectivePartitionFn,
}

impl ColocationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: TableId) -> Option<&TableNode> {
        self.nodes.get(id as usize).and_then(Option::as_ref)
    }

    pub fn lookup(&self, name: &str) -> Option<&TableNode> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Registered tables in id order.
    pub fn tables(&self) -> impl Iterator<Item = &TableNode> {
        self.nodes.iter().flatten()
    }

    /// Names of tables colocated directly with `name`.
    pub fn children_of(&self, name: &str) -> Vec<String> {
        self.lookup(name)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|c| self.get(*c))
                    .map(|c| c.schema.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve the partition function of `schema` placed in `zone`.
    ///
    /// Nothing is registered; call [`ColocationGraph::insert`] with the
    /// result to commit.
    pub fn resolve(&self, schema: &TableSchema, zone: &ZoneDefinition) -> SchemaResult<Resolution> {
        let Some(parent_name) = &schema.colocate_with else {
            let key_positions = schema
                .colocation_key
                .iter()
                .map(|c| position(schema, c))
                .collect::<SchemaResult<Vec<_>>>()?;
            let partition_fn = EffectivePartitionFn {
                root_table: schema.name.clone(),
                zone: zone.name.clone(),
                partitions: zone.partitions,
                key_types: types_at(schema, &key_positions),
                key_columns: schema.colocation_key.clone(),
                key_positions,
            };
            return Ok(Resolution {
                parent: None,
                partition_fn,
            });
        };

        self.check_path(schema)?;

        let parent = self
            .lookup(parent_name)
            .ok_or_else(|| SchemaError::OrphanColocation {
                table: schema.name.clone(),
                parent: parent_name.clone(),
            })?;

        if parent.schema.zone != schema.zone {
            return Err(SchemaError::ZoneMismatch {
                table: schema.name.clone(),
                zone: schema.zone.clone(),
                parent: parent.schema.name.clone(),
                parent_zone: parent.schema.zone.clone(),
            });
        }

        let mismatch = |reason: String| SchemaError::ColocationKeyMismatch {
            table: schema.name.clone(),
            parent: parent.schema.name.clone(),
            reason,
        };

        for column in &schema.colocation_key {
            if parent.schema.key_position(column).is_none() {
                return Err(mismatch(format!(
                    "{column} is not a primary-key column of {}",
                    parent.schema.name
                )));
            }
            let child_ty = column_type(schema, column)?;
            let parent_ty = column_type(&parent.schema, column)?;
            if !child_ty.is_compatible_with(&parent_ty) {
                return Err(SchemaError::TypeMismatch {
                    table: schema.name.clone(),
                    parent: parent.schema.name.clone(),
                    column: column.clone(),
                    child: child_ty,
                    parent_ty,
                });
            }
        }

        // The child may name extra parent key columns, but only the
        // inherited ones feed the hash.
        let inherited = &parent.partition_fn.key_columns;
        let missing: Vec<&str> = inherited
            .iter()
            .filter(|c| !schema.colocation_key.contains(c))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(mismatch(format!(
                "colocation key ({}) must include ({}), which {} partitions by through {}; \
                 add {} to the primary key and colocation key of {}",
                schema.colocation_key.join(", "),
                inherited.join(", "),
                parent.schema.name,
                parent.partition_fn.root_table,
                missing.join(", "),
                schema.name
            )));
        }

        // Follow the root's column order so equal values hash alike.
        let key_positions = inherited
            .iter()
            .map(|c| position(schema, c))
            .collect::<SchemaResult<Vec<_>>>()?;

        let partition_fn = EffectivePartitionFn {
            root_table: parent.partition_fn.root_table.clone(),
            zone: zone.name.clone(),
            partitions: zone.partitions,
            key_types: types_at(schema, &key_positions),
            key_columns: inherited.clone(),
            key_positions,
        };

        debug!(
            table = %schema.name,
            parent = %parent.schema.name,
            root = %partition_fn.root_table,
            "colocation chain resolved"
        );

        Ok(Resolution {
            parent: Some(parent.id),
            partition_fn,
        })
    }

    /// Register a resolved table and return its id.
    pub fn insert(&mut self, schema: TableSchema, resolution: Resolution) -> TableId {
        let id = self.nodes.len() as TableId;
        if let Some(parent) = resolution
            .parent
            .and_then(|p| self.nodes.get_mut(p as usize))
            .and_then(Option::as_mut)
        {
            parent.children.push(id);
        }
        self.by_name.insert(schema.name.clone(), id);
        self.nodes.push(Some(TableNode {
            id,
            schema,
            parent: resolution.parent,
            children: Vec::new(),
            partition_fn: Arc::new(resolution.partition_fn),
        }));
        id
    }

    /// Replace the schema of a registered table, keeping its partition
    /// function. Used for index changes.
    pub fn update_schema(&mut self, schema: TableSchema) -> bool {
        let Some(id) = self.by_name.get(&schema.name).copied() else {
            return false;
        };
        match self.nodes.get_mut(id as usize).and_then(Option::as_mut) {
            Some(node) => {
                node.schema = schema;
                true
            }
            None => false,
        }
    }

    /// Unregister a table. Fails with `TableInUse` while children remain.
    pub fn remove(&mut self, name: &str) -> SchemaResult<TableNode> {
        let id = *self
            .by_name
            .get(name)
            .ok_or_else(|| SchemaError::NotFound(name.to_string()))?;

        let children = self.children_of(name);
        if !children.is_empty() {
            return Err(SchemaError::TableInUse {
                table: name.to_string(),
                children,
            });
        }

        let node = self
            .nodes
            .get_mut(id as usize)
            .and_then(Option::take)
            .ok_or_else(|| SchemaError::NotFound(name.to_string()))?;
        self.by_name.remove(name);

        if let Some(parent) = node
            .parent
            .and_then(|p| self.nodes.get_mut(p as usize))
            .and_then(Option::as_mut)
        {
            parent.children.retain(|c| *c != id);
        }
        Ok(node)
    }

    /// Walk `colocate_with` references from `schema`, failing on a revisit.
    fn check_path(&self, schema: &TableSchema) -> SchemaResult<()> {
        let mut path = vec![schema.name.clone()];
        let mut next = schema.colocate_with.clone();
        while let Some(name) = next {
            if path.contains(&name) {
                path.push(name);
                return Err(SchemaError::Cycle(path));
            }
            next = self
                .lookup(&name)
                .and_then(|node| node.schema.colocate_with.clone());
            path.push(name);
        }
        Ok(())
    }
}

/// Order `schemas` so that every parent precedes its children.
///
/// Returns `Cycle` when the references loop, and leaves tables whose
/// parent is absent at the end for the resolver to reject.
pub fn parents_first(schemas: Vec<TableSchema>) -> SchemaResult<Vec<TableSchema>> {
    let names: HashMap<String, Option<String>> = schemas
        .iter()
        .map(|s| (s.name.clone(), s.colocate_with.clone()))
        .collect();

    for schema in &schemas {
        let mut path = vec![schema.name.clone()];
        let mut next = schema.colocate_with.clone();
        while let Some(name) = next {
            if path.contains(&name) {
                path.push(name);
                return Err(SchemaError::Cycle(path));
            }
            next = names.get(&name).cloned().flatten();
            path.push(name);
        }
    }

    let depth = |s: &TableSchema| {
        let mut d = 0usize;
        let mut next = s.colocate_with.clone();
        while let Some(name) = next {
            d += 1;
            next = names.get(&name).cloned().flatten();
        }
        d
    };

    let mut ordered = schemas;
    ordered.sort_by_cached_key(|s| (depth(s), s.name.clone()));
    Ok(ordered)
}

fn position(schema: &TableSchema, column: &str) -> SchemaResult<usize> {
    schema
        .key_position(column)
        .ok_or_else(|| SchemaError::Invalid {
            table: schema.name.clone(),
            reason: format!("colocation column {column} is not part of the primary key"),
        })
}

fn column_type(schema: &TableSchema, column: &str) -> SchemaResult<ColumnType> {
    schema
        .column(column)
        .map(|c| c.ty)
        .ok_or_else(|| SchemaError::Invalid {
            table: schema.name.clone(),
            reason: format!("column {column} is not declared"),
        })
}

fn types_at(schema: &TableSchema, positions: &[usize]) -> Vec<ColumnType> {
    positions
        .iter()
        .filter_map(|p| schema.primary_key.get(*p))
        .filter_map(|name| schema.column(name))
        .map(|c| c.ty)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchemaExt;
    use zonegrid_core::ConsistencyMode;

    fn zone() -> ZoneDefinition {
        ZoneDefinition {
            id: 1,
            name: "MUSICSTORE".to_string(),
            replicas: 2,
            partitions: 25,
            storage_profile: "default".to_string(),
            consistency_mode: ConsistencyMode::Strong,
        }
    }

    fn artist() -> TableSchema {
        TableSchema::builder("Artist")
            .column("ArtistId", ColumnType::Int32)
            .varchar("Name", 120)
            .primary_key(&["ArtistId"])
            .zone("MusicStore")
            .build()
            .unwrap()
    }

    fn album() -> TableSchema {
        TableSchema::builder("Album")
            .column("AlbumId", ColumnType::Int32)
            .column("ArtistId", ColumnType::Int32)
            .varchar("Title", 160)
            .primary_key(&["AlbumId", "ArtistId"])
            .colocate_by(&["ArtistId"])
            .colocate_with("Artist")
            .zone("MusicStore")
            .build()
            .unwrap()
    }

    fn track() -> TableSchema {
        TableSchema::builder("Track")
            .column("TrackId", ColumnType::Int32)
            .column("AlbumId", ColumnType::Int32)
            .column("ArtistId", ColumnType::Int64)
            .varchar("Name", 200)
            .primary_key(&["TrackId", "AlbumId", "ArtistId"])
            .colocate_by(&["ArtistId"])
            .colocate_with("Album")
            .zone("MusicStore")
            .build()
            .unwrap()
    }

    fn register(graph: &mut ColocationGraph, schema: TableSchema) -> TableId {
        let resolution = graph.resolve(&schema, &zone()).unwrap();
        graph.insert(schema, resolution)
    }

    #[test]
    fn root_table_uses_own_key() {
        let mut graph = ColocationGraph::new();
        let id = register(&mut graph, artist());
        let node = graph.get(id).unwrap();
        assert_eq!(node.partition_fn.root_table, "ARTIST");
        assert_eq!(node.partition_fn.key_positions, vec![0]);
        assert!(node.parent.is_none());
    }

    #[test]
    fn three_level_chain_colocates() {
        let mut graph = ColocationGraph::new();
        let a = register(&mut graph, artist());
        let b = register(&mut graph, album());
        let c = register(&mut graph, track());

        let artist_fn = graph.get(a).unwrap().partition_fn.clone();
        let album_fn = graph.get(b).unwrap().partition_fn.clone();
        let track_fn = graph.get(c).unwrap().partition_fn.clone();
        assert_eq!(track_fn.root_table, "ARTIST");
        assert_eq!(track_fn.key_positions, vec![2]);

        for artist_id in 0..200 {
            let p = artist_fn.partition_of_key(&[Value::Int32(artist_id)]).unwrap();
            let album_key = [Value::Int32(artist_id * 7 + 1), Value::Int32(artist_id)];
            let track_key = [
                Value::Int32(99),
                Value::Int32(artist_id * 7 + 1),
                Value::Int64(i64::from(artist_id)),
            ];
            assert_eq!(album_fn.partition_of_key(&album_key).unwrap(), p);
            assert_eq!(track_fn.partition_of_key(&track_key).unwrap(), p);
        }

        assert_eq!(graph.children_of("ARTIST"), vec!["ALBUM"]);
    }

    #[test]
    fn missing_parent_is_orphan() {
        let graph = ColocationGraph::new();
        let err = graph.resolve(&album(), &zone()).unwrap_err();
        assert!(matches!(err, SchemaError::OrphanColocation { parent, .. } if parent == "ARTIST"));
    }

    #[test]
    fn incompatible_types_rejected() {
        let mut graph = ColocationGraph::new();
        register(&mut graph, artist());
        let album = TableSchema::builder("Album")
            .column("AlbumId", ColumnType::Int32)
            .column("ArtistId", ColumnType::Varchar)
            .primary_key(&["AlbumId", "ArtistId"])
            .colocate_by(&["ArtistId"])
            .colocate_with("Artist")
            .zone("MusicStore")
            .build()
            .unwrap();

        let err = graph.resolve(&album, &zone()).unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { column, .. } if column == "ARTISTID"));
    }

    #[test]
    fn colocation_column_must_be_parent_key() {
        let mut graph = ColocationGraph::new();
        register(&mut graph, artist());
        let album = TableSchema::builder("Album")
            .column("AlbumId", ColumnType::Int32)
            .primary_key(&["AlbumId"])
            .colocate_with("Artist")
            .zone("MusicStore")
            .build()
            .unwrap();

        assert!(matches!(
            graph.resolve(&album, &zone()),
            Err(SchemaError::ColocationKeyMismatch { .. })
        ));
    }

    #[test]
    fn colocation_key_must_cover_inherited_key() {
        let mut graph = ColocationGraph::new();
        register(&mut graph, artist());
        register(&mut graph, album());

        // Album partitions by ArtistId; a child keyed by AlbumId alone
        // would not land with its album.
        let track = TableSchema::builder("Track")
            .column("TrackId", ColumnType::Int32)
            .column("AlbumId", ColumnType::Int32)
            .primary_key(&["TrackId", "AlbumId"])
            .colocate_by(&["AlbumId"])
            .colocate_with("Album")
            .zone("MusicStore")
            .build()
            .unwrap();

        let err = graph.resolve(&track, &zone()).unwrap_err();
        assert!(matches!(
            &err,
            SchemaError::ColocationKeyMismatch { reason, .. }
                if reason.contains("must include (ARTISTID)") && reason.contains("add ARTISTID")
        ));
    }

    #[test]
    fn wider_child_key_hashes_inherited_columns_only() {
        let mut graph = ColocationGraph::new();
        let a = register(&mut graph, artist());
        register(&mut graph, album());

        let track = TableSchema::builder("Track")
            .column("TrackId", ColumnType::Int32)
            .column("AlbumId", ColumnType::Int32)
            .column("ArtistId", ColumnType::Int32)
            .primary_key(&["TrackId", "AlbumId", "ArtistId"])
            .colocate_by(&["AlbumId", "ArtistId"])
            .colocate_with("Album")
            .zone("MusicStore")
            .build()
            .unwrap();
        let t = register(&mut graph, track);

        let track_fn = graph.get(t).unwrap().partition_fn.clone();
        assert_eq!(track_fn.key_columns, vec!["ARTISTID"]);
        assert_eq!(track_fn.key_positions, vec![2]);

        let artist_fn = graph.get(a).unwrap().partition_fn.clone();
        for artist_id in 0..50 {
            let key = [Value::Int32(1), Value::Int32(artist_id + 100), Value::Int32(artist_id)];
            assert_eq!(
                track_fn.partition_of_key(&key).unwrap(),
                artist_fn.partition_of_key(&[Value::Int32(artist_id)]).unwrap()
            );
        }
    }

    #[test]
    fn zone_mismatch_rejected() {
        let mut graph = ColocationGraph::new();
        register(&mut graph, artist());
        let album = TableSchema::builder("Album")
            .column("AlbumId", ColumnType::Int32)
            .column("ArtistId", ColumnType::Int32)
            .primary_key(&["AlbumId", "ArtistId"])
            .colocate_by(&["ArtistId"])
            .colocate_with("Artist")
            .zone("Other")
            .build()
            .unwrap();

        assert!(matches!(
            graph.resolve(&album, &zone()),
            Err(SchemaError::ZoneMismatch { .. })
        ));
    }

    #[test]
    fn self_reference_is_cycle() {
        let graph = ColocationGraph::new();
        let schema = TableSchema::builder("T")
            .column("id", ColumnType::Int32)
            .primary_key(&["id"])
            .colocate_with("T")
            .build()
            .unwrap();

        let err = graph.resolve(&schema, &zone()).unwrap_err();
        assert!(matches!(err, SchemaError::Cycle(path) if path == vec!["T", "T"]));
    }

    #[test]
    fn remove_blocked_by_children() {
        let mut graph = ColocationGraph::new();
        register(&mut graph, artist());
        register(&mut graph, album());

        assert!(matches!(
            graph.remove("ARTIST"),
            Err(SchemaError::TableInUse { children, .. }) if children == vec!["ALBUM"]
        ));

        graph.remove("ALBUM").unwrap();
        graph.remove("ARTIST").unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn parents_first_orders_and_detects_cycles() {
        let ordered = parents_first(vec![track(), album(), artist()]).unwrap();
        let names: Vec<_> = ordered.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["ARTIST", "ALBUM", "TRACK"]);

        let mut a = artist();
        a.colocate_with = Some("TRACK".to_string());
        let err = parents_first(vec![a, album(), track()]).unwrap_err();
        assert!(matches!(err, SchemaError::Cycle(_)));
    }

    #[test]
    fn null_and_short_keys_rejected() {
        let mut graph = ColocationGraph::new();
        let id = register(&mut graph, album_root());
        let f = &graph.get(id).unwrap().partition_fn;

        assert!(f.partition_of_key(&[Value::Int32(1)]).is_err());
        assert!(f.partition_of_key(&[Value::Int32(1), Value::Null]).is_err());
        assert!(f.partition_of_key(&[Value::Int32(1), Value::from("x")]).is_err());
    }

    fn album_root() -> TableSchema {
        TableSchema::builder("Album")
            .column("AlbumId", ColumnType::Int32)
            .column("ArtistId", ColumnType::Int32)
            .primary_key(&["AlbumId", "ArtistId"])
            .colocate_by(&["ArtistId"])
            .zone("MusicStore")
            .build()
            .unwrap()
    }
}
