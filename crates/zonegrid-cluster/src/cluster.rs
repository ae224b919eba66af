//! The cluster facade.
//!
//! Wires the catalog, placement and the replica manager together: DDL
//! outcomes drive replica assignment, rows are routed through their
//! table's cached partition function, and membership changes trigger
//! failover and rebalancing.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use zonegrid_catalog::{Catalog, Outcome, Statement, ZoneAlter, ZoneSpec, parse};
use zonegrid_core::config::ZoneConfig;
use zonegrid_core::{ConsistencyMode, NodeId, PartitionId, Row, TableId, Value};
use zonegrid_replica::{RebalanceReport, ReplicaError, ReplicaManager, WriteAck, WriteOp};
use zonegrid_state::{TableSchema, ZoneDefinition};

use crate::error::{ClusterError, ClusterResult};
use crate::membership::MembershipProvider;

/// A primary handed over after a node failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Promotion {
    pub zone: String,
    pub partition: PartitionId,
    /// `None` when no live replica was left to promote.
    pub primary: Option<NodeId>,
}

pub struct Cluster {
    catalog: Arc<Catalog>,
    replicas: Arc<ReplicaManager>,
    membership: Arc<dyn MembershipProvider>,
}

impl Cluster {
    pub fn new(
        catalog: Arc<Catalog>,
        replicas: Arc<ReplicaManager>,
        membership: Arc<dyn MembershipProvider>,
    ) -> Self {
        Self {
            catalog,
            replicas,
            membership,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn replicas(&self) -> &Arc<ReplicaManager> {
        &self.replicas
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.membership.current_nodes()
    }

    /// Bring every catalog zone under replica management, from persisted
    /// assignments where they exist. Returns the number restored.
    pub fn restore_assignments(&self) -> ClusterResult<usize> {
        let mut restored = 0;
        for zone in self.catalog.zones().list_zones() {
            if self.replicas.restore(&zone)? {
                restored += 1;
            } else {
                self.replicas.assign(&zone, &self.nodes())?;
            }
        }
        Ok(restored)
    }

    /// Create configured zones that do not exist yet.
    pub async fn bootstrap_zones(&self, zones: &[ZoneConfig]) -> ClusterResult<Vec<Outcome>> {
        let mut outcomes = Vec::with_capacity(zones.len());
        for zone in zones {
            let outcome = self
                .execute(Statement::CreateZone {
                    spec: ZoneSpec::from(zone),
                    if_not_exists: true,
                })
                .await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Apply one DDL statement and react to its outcome.
    pub async fn execute(&self, statement: Statement) -> ClusterResult<Outcome> {
        let outcome = self.catalog.execute(statement)?;
        self.apply_outcome(&outcome).await?;
        Ok(outcome)
    }

    /// Parse and apply a script, stopping at the first failing statement.
    pub async fn execute_script(&self, source: &str) -> ClusterResult<Vec<Outcome>> {
        let statements = parse(source).map_err(zonegrid_catalog::CatalogError::from)?;
        let mut outcomes = Vec::with_capacity(statements.len());
        for statement in statements {
            outcomes.push(self.execute(statement).await?);
        }
        Ok(outcomes)
    }

    pub async fn create_zone(&self, spec: ZoneSpec, if_not_exists: bool) -> ClusterResult<ZoneDefinition> {
        match self
            .execute(Statement::CreateZone {
                spec,
                if_not_exists,
            })
            .await?
        {
            Outcome::ZoneCreated { zone } | Outcome::ZoneExists { zone } => Ok(zone),
            other => unreachable_outcome(other),
        }
    }

    pub async fn alter_zone(&self, name: &str, alter: ZoneAlter) -> ClusterResult<ZoneDefinition> {
        match self
            .execute(Statement::AlterZone {
                name: name.to_string(),
                alter,
                if_exists: false,
            })
            .await?
        {
            Outcome::ZoneAltered { zone, .. } => Ok(zone),
            other => unreachable_outcome(other),
        }
    }

    pub async fn drop_zone(&self, name: &str, if_exists: bool) -> ClusterResult<Option<ZoneDefinition>> {
        match self
            .execute(Statement::DropZone {
                name: name.to_string(),
                if_exists,
            })
            .await?
        {
            Outcome::ZoneDropped { zone } => Ok(Some(zone)),
            _ => Ok(None),
        }
    }

    /// Register a table built with the schema builder.
    pub async fn create_table(&self, schema: TableSchema, if_not_exists: bool) -> ClusterResult<TableId> {
        let zone = schema.zone.clone();
        let id = self.catalog.create_table(schema, if_not_exists)?;
        if let Some(zone) = self.catalog.zones().get_zone(&zone) {
            self.replicas.assign(&zone, &self.nodes())?;
        }
        Ok(id)
    }

    /// Drop a table and the rows it held. Returns whether it existed.
    pub async fn drop_table(&self, name: &str, if_exists: bool) -> ClusterResult<bool> {
        let outcome = self
            .execute(Statement::DropTable {
                name: name.to_string(),
                if_exists,
            })
            .await?;
        Ok(matches!(outcome, Outcome::TableDropped { .. }))
    }

    async fn apply_outcome(&self, outcome: &Outcome) -> ClusterResult<()> {
        match outcome {
            Outcome::ZoneCreated { zone } | Outcome::ZoneExists { zone } => {
                self.replicas.assign(zone, &self.nodes())?;
            }
            Outcome::ZoneAltered { zone, previous } => {
                self.replicas.assign(zone, &self.nodes())?;
                self.replicas.update_zone(zone)?;
                if zone.replicas != previous.replicas {
                    let report = self.replicas.rebalance(&zone.name, &self.nodes()).await?;
                    log_report(&report);
                }
            }
            Outcome::ZoneDropped { zone } => match self.replicas.retire_zone(&zone.name) {
                Ok(()) | Err(ReplicaError::ZoneNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            },
            Outcome::TableCreated { zone, .. } => {
                // Tables may have created the default zone on the fly.
                if let Some(zone) = self.catalog.zones().get_zone(zone) {
                    self.replicas.assign(&zone, &self.nodes())?;
                }
            }
            Outcome::TableDropped { table, zone } => self.replicas.purge_table(zone, table),
            Outcome::TableExists { .. }
            | Outcome::IndexCreated { .. }
            | Outcome::Skipped { .. } => {}
        }
        Ok(())
    }

    /// Zone and partition a primary key routes to.
    pub fn locate(&self, table: &str, key: &[Value]) -> ClusterResult<(String, PartitionId)> {
        let pf = self.catalog.partition_fn(table)?;
        let partition = pf.partition_of_key(key)?;
        Ok((pf.zone.clone(), partition))
    }

    /// Insert or replace a row.
    pub async fn put_row(&self, row: Row) -> ClusterResult<WriteAck> {
        let schema = self.schema(&row.table)?;
        validate_row(&schema, &row)?;
        let key = normalize_key(&schema, row.key);
        let value = normalize_value(&schema, row.value);
        let (zone, partition) = self.locate(&schema.name, &key)?;
        debug!(table = %schema.name, %zone, partition, "routing row write");
        Ok(self
            .replicas
            .write(&zone, partition, &schema.name, key, WriteOp::Put(value))
            .await?)
    }

    /// Read a row; `mode` defaults to the zone's consistency mode.
    pub async fn get_row(
        &self,
        table: &str,
        key: &[Value],
        mode: Option<ConsistencyMode>,
    ) -> ClusterResult<Option<Row>> {
        let schema = self.schema(table)?;
        check_key(&schema, key)?;
        let key = normalize_key(&schema, key.to_vec());
        let (zone, partition) = self.locate(&schema.name, &key)?;
        let mode = match mode {
            Some(mode) => mode,
            None => self
                .catalog
                .zones()
                .get_zone(&zone)
                .map(|z| z.consistency_mode)
                .unwrap_or_default(),
        };
        let value = self
            .replicas
            .read(&zone, partition, &schema.name, &key, mode)
            .await?;
        Ok(value.map(|value| Row::new(&schema.name, key, value)))
    }

    pub async fn delete_row(&self, table: &str, key: Vec<Value>) -> ClusterResult<WriteAck> {
        let schema = self.schema(table)?;
        check_key(&schema, &key)?;
        let key = normalize_key(&schema, key);
        let (zone, partition) = self.locate(&schema.name, &key)?;
        Ok(self
            .replicas
            .write(&zone, partition, &schema.name, key, WriteOp::Delete)
            .await?)
    }

    /// Fail `node` and promote the first live backup of every partition
    /// it led, including partitions whose writes already found it down.
    /// Stands in for an external leader election.
    pub fn handle_node_failure(&self, node: &str) -> Vec<Promotion> {
        let mut orphaned = self.replicas.node_failed(node);
        for pair in self.replicas.leaderless() {
            if !orphaned.contains(&pair) {
                orphaned.push(pair);
            }
        }
        let promotions = self.promote(orphaned);
        info!(%node, promoted = promotions.iter().filter(|p| p.primary.is_some()).count(), "node failure handled");
        promotions
    }

    /// Promote a live replica for every partition without a confirmed
    /// primary, such as a last replica kept through a full outage.
    pub fn promote_leaderless(&self) -> Vec<Promotion> {
        let promotions = self.promote(self.replicas.leaderless());
        let promoted = promotions.iter().filter(|p| p.primary.is_some()).count();
        if promoted > 0 {
            info!(promoted, "leaderless partitions promoted");
        }
        promotions
    }

    fn promote(&self, orphaned: Vec<(String, PartitionId)>) -> Vec<Promotion> {
        let transport = self.replicas.transport();
        let mut promotions = Vec::with_capacity(orphaned.len());

        for (zone, partition) in orphaned {
            let candidate = self.replicas.group(&zone, partition).ok().and_then(|g| {
                g.replicas
                    .iter()
                    .find(|n| transport.is_alive(n))
                    .cloned()
            });
            let primary = match candidate {
                Some(candidate) => match self.replicas.confirm_primary(&zone, partition, &candidate) {
                    Ok(()) => Some(candidate),
                    Err(e) => {
                        warn!(%zone, partition, error = %e, "promotion failed");
                        None
                    }
                },
                None => {
                    warn!(%zone, partition, "no live replica left to promote");
                    None
                }
            };
            promotions.push(Promotion {
                zone,
                partition,
                primary,
            });
        }
        promotions
    }

    /// Rebalance every live zone onto the current node set.
    pub async fn rebalance_all(&self) -> Vec<RebalanceReport> {
        let nodes = self.nodes();
        let mut reports = Vec::new();
        for zone in self.replicas.zone_names() {
            match self.replicas.rebalance(&zone, &nodes).await {
                Ok(report) => {
                    log_report(&report);
                    reports.push(report);
                }
                Err(e) => warn!(%zone, error = %e, "rebalance failed"),
            }
        }
        reports
    }

    /// Follow membership changes until `shutdown` flips: departed nodes
    /// are failed over, every zone is rebalanced and partitions left
    /// without a primary get one again once a replica is reachable.
    pub async fn run_membership_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut updates = self.membership.subscribe();
        let mut known = updates.borrow_and_update().clone();
        info!(nodes = known.len(), "membership loop started");

        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let nodes = updates.borrow_and_update().clone();
                    for gone in known.iter().filter(|n| !nodes.contains(n)) {
                        self.handle_node_failure(gone);
                    }
                    info!(nodes = ?nodes, "membership changed, rebalancing");
                    known = nodes;
                    self.rebalance_all().await;
                    self.promote_leaderless();
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("membership loop stopped");
    }

    fn schema(&self, table: &str) -> ClusterResult<TableSchema> {
        self.catalog
            .get_table(table)
            .ok_or_else(|| zonegrid_catalog::SchemaError::NotFound(table.to_string()).into())
    }
}

fn log_report(report: &RebalanceReport) {
    if report.failed.is_empty() {
        info!(
            zone = %report.zone,
            moved = report.moved,
            degraded = report.degraded,
            "zone rebalanced"
        );
    } else {
        warn!(
            zone = %report.zone,
            moved = report.moved,
            failed = report.failed.len(),
            "zone rebalanced with failures"
        );
    }
}

fn unreachable_outcome<T>(outcome: Outcome) -> ClusterResult<T> {
    Err(ClusterError::UnexpectedOutcome(outcome.to_string()))
}

fn invalid(schema: &TableSchema, reason: String) -> ClusterError {
    ClusterError::InvalidRow {
        table: schema.name.clone(),
        reason,
    }
}

fn check_key(schema: &TableSchema, key: &[Value]) -> ClusterResult<()> {
    if key.len() != schema.primary_key.len() {
        return Err(invalid(
            schema,
            format!("key has {} columns, expected {}", key.len(), schema.primary_key.len()),
        ));
    }
    for (name, value) in schema.primary_key.iter().zip(key) {
        let Some(col) = schema.column(name) else {
            continue;
        };
        if value.is_null() {
            return Err(invalid(schema, format!("key column {name} is null")));
        }
        if !value.fits(col.ty) {
            return Err(invalid(schema, format!("key column {name} expects {}, got {value}", col.ty)));
        }
    }
    Ok(())
}

/// Widen key columns to their declared types so equal keys are stored
/// under one representation.
fn normalize_key(schema: &TableSchema, key: Vec<Value>) -> Vec<Value> {
    schema
        .primary_key
        .iter()
        .zip(key)
        .map(|(name, value)| match schema.column(name) {
            Some(col) => value.coerce(col.ty),
            None => value,
        })
        .collect()
}

fn normalize_value(schema: &TableSchema, value: Vec<Value>) -> Vec<Value> {
    schema
        .value_columns()
        .zip(value)
        .map(|(col, value)| value.coerce(col.ty))
        .collect()
}

/// Check a row's shape, types, nullability and lengths against its schema.
fn validate_row(schema: &TableSchema, row: &Row) -> ClusterResult<()> {
    check_key(schema, &row.key)?;

    let columns: Vec<_> = schema.value_columns().collect();
    if row.value.len() != columns.len() {
        return Err(invalid(
            schema,
            format!("row has {} value columns, expected {}", row.value.len(), columns.len()),
        ));
    }
    for (col, value) in columns.iter().zip(&row.value) {
        if value.is_null() {
            if !col.nullable {
                return Err(invalid(schema, format!("column {} is NOT NULL", col.name)));
            }
            continue;
        }
        if !value.fits(col.ty) {
            return Err(invalid(
                schema,
                format!("column {} expects {}, got {value}", col.name, col.ty),
            ));
        }
        let len = match value {
            Value::Varchar(s) => Some(s.chars().count()),
            Value::Varbinary(b) => Some(b.len()),
            _ => None,
        };
        if let (Some(len), Some(max)) = (len, col.length) {
            if len > max as usize {
                return Err(invalid(
                    schema,
                    format!("column {} is limited to {max}, got {len}", col.name),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use zonegrid_catalog::TableSchemaExt;
    use zonegrid_core::ColumnType;
    use zonegrid_replica::LocalTransport;
    use zonegrid_state::StateStore;

    use super::*;
    use crate::membership::MembershipManager;

    struct Harness {
        cluster: Cluster,
        membership: Arc<MembershipManager>,
        transport: Arc<LocalTransport>,
    }

    fn harness(nodes: &[&str]) -> Harness {
        let membership = Arc::new(MembershipManager::new(StateStore::open_in_memory().unwrap()));
        for (i, n) in nodes.iter().enumerate() {
            membership
                .join(Some(n), "127.0.0.1", 4000 + i as u16, HashMap::new())
                .unwrap();
        }
        let transport = Arc::new(LocalTransport::new());
        let replicas = Arc::new(ReplicaManager::new(transport.clone()));
        let cluster = Cluster::new(Arc::new(Catalog::new()), replicas, membership.clone());
        Harness {
            cluster,
            membership,
            transport,
        }
    }

    const MUSIC: &str = "
        CREATE ZONE MusicStore WITH REPLICAS=2, PARTITIONS=25, STORAGE_PROFILES='default';
        CREATE TABLE Artist (ArtistId INT PRIMARY KEY, Name VARCHAR(20)) WITH ZONE=MusicStore;
        CREATE TABLE Album (AlbumId INT, ArtistId INT, Title VARCHAR, PRIMARY KEY (AlbumId, ArtistId))
            WITH ZONE=MusicStore, COLOCATE_BY=(ArtistId), COLOCATE_WITH=Artist;
    ";

    #[tokio::test]
    async fn ddl_assigns_replicas() {
        let h = harness(&["n1", "n2", "n3"]);
        h.cluster.execute_script(MUSIC).await.unwrap();

        let assignments = h.cluster.replicas().assignments("MUSICSTORE").unwrap();
        assert_eq!(assignments.len(), 25);
        assert!(assignments.iter().all(|a| a.replicas.len() == 2));
    }

    #[tokio::test]
    async fn colocated_rows_share_partition_and_replicas() {
        let h = harness(&["n1", "n2", "n3"]);
        h.cluster.execute_script(MUSIC).await.unwrap();

        h.cluster
            .put_row(Row::new("Artist", vec![Value::Int32(1)], vec![Value::from("A")]))
            .await
            .unwrap();
        h.cluster
            .put_row(Row::new(
                "Album",
                vec![Value::Int32(10), Value::Int32(1)],
                vec![Value::from("X")],
            ))
            .await
            .unwrap();

        let artist = h.cluster.locate("Artist", &[Value::Int32(1)]).unwrap();
        let album = h
            .cluster
            .locate("Album", &[Value::Int32(10), Value::Int32(1)])
            .unwrap();
        assert_eq!(artist, album);

        let row = h
            .cluster
            .get_row("album", &[Value::Int32(10), Value::Int32(1)], None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.value, vec![Value::from("X")]);
    }

    #[tokio::test]
    async fn rows_are_validated() {
        let h = harness(&["n1"]);
        h.cluster.execute_script(MUSIC).await.unwrap();

        let too_long = Row::new("Artist", vec![Value::Int32(1)], vec![Value::from("x".repeat(21))]);
        assert!(matches!(
            h.cluster.put_row(too_long).await,
            Err(ClusterError::InvalidRow { .. })
        ));
        let wrong_type = Row::new("Artist", vec![Value::from("one")], vec![Value::Null]);
        assert!(matches!(
            h.cluster.put_row(wrong_type).await,
            Err(ClusterError::InvalidRow { .. })
        ));
        let nullable = Row::new("Artist", vec![Value::Int32(2)], vec![Value::Null]);
        h.cluster.put_row(nullable).await.unwrap();
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let h = harness(&["n1", "n2"]);
        h.cluster.execute_script(MUSIC).await.unwrap();
        h.cluster
            .put_row(Row::new("Artist", vec![Value::Int32(1)], vec![Value::from("A")]))
            .await
            .unwrap();
        h.cluster.delete_row("Artist", vec![Value::Int32(1)]).await.unwrap();
        assert!(h.cluster.get_row("Artist", &[Value::Int32(1)], None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn default_zone_tables_are_routable() {
        let h = harness(&["n1"]);
        let schema = TableSchema::builder("Kv")
            .column("K", ColumnType::Int64)
            .nullable_column("V", ColumnType::Varchar)
            .primary_key(&["K"])
            .build()
            .unwrap();
        h.cluster.create_table(schema, false).await.unwrap();

        h.cluster
            .put_row(Row::new("Kv", vec![Value::Int64(1)], vec![Value::from("v")]))
            .await
            .unwrap();
        assert_eq!(h.cluster.locate("Kv", &[Value::Int64(1)]).unwrap().0, "DEFAULT");
    }

    #[tokio::test]
    async fn node_failure_promotes_a_backup() {
        let h = harness(&["n1", "n2", "n3"]);
        h.cluster.execute_script(MUSIC).await.unwrap();
        h.cluster
            .put_row(Row::new("Artist", vec![Value::Int32(1)], vec![Value::from("A")]))
            .await
            .unwrap();

        let (zone, p) = h.cluster.locate("Artist", &[Value::Int32(1)]).unwrap();
        let before = h.cluster.replicas().group(&zone, p).unwrap();
        let (primary, backup) = (before.replicas[0].clone(), before.replicas[1].clone());

        h.transport.kill(&primary);
        let promotions = h.cluster.handle_node_failure(&primary);
        assert!(promotions
            .iter()
            .any(|pr| pr.zone == zone && pr.partition == p && pr.primary.as_deref() == Some(backup.as_str())));

        let row = h
            .cluster
            .get_row("Artist", &[Value::Int32(1)], Some(ConsistencyMode::Strong))
            .await
            .unwrap();
        assert_eq!(row.map(|r| r.value), Some(vec![Value::from("A")]));
    }

    #[tokio::test]
    async fn dropping_a_zone_retires_it() {
        let h = harness(&["n1"]);
        h.cluster
            .execute_script("CREATE ZONE Z WITH REPLICAS=1, PARTITIONS=4, STORAGE_PROFILES='default'")
            .await
            .unwrap();
        assert!(h.cluster.drop_zone("Z", false).await.unwrap().is_some());
        assert!(matches!(
            h.cluster.replicas().route_write("Z", 0),
            Err(ReplicaError::ZoneRetired(_))
        ));
        assert!(h.cluster.drop_zone("Z", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn raising_replicas_rebalances() {
        let h = harness(&["n1", "n2", "n3"]);
        h.cluster.execute_script(MUSIC).await.unwrap();
        h.cluster
            .alter_zone("MusicStore", ZoneAlter::replicas(3))
            .await
            .unwrap();
        let assignments = h.cluster.replicas().assignments("MUSICSTORE").unwrap();
        assert!(assignments.iter().all(|a| a.replicas.len() == 3));
    }

    #[tokio::test]
    async fn membership_loop_rebalances_on_join() {
        let h = harness(&["n1"]);
        h.cluster.execute_script(MUSIC).await.unwrap();
        assert!(h.cluster.replicas().group("MUSICSTORE", 0).unwrap().degraded);

        let cluster = Arc::new(h.cluster);
        let (stop, stop_rx) = watch::channel(false);
        let runner = tokio::spawn({
            let cluster = cluster.clone();
            async move { cluster.run_membership_loop(stop_rx).await }
        });
        tokio::task::yield_now().await;

        h.membership
            .join(Some("n2"), "127.0.0.1", 4100, HashMap::new())
            .unwrap();
        let mut settled = false;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            let assignments = cluster.replicas().assignments("MUSICSTORE").unwrap();
            if assignments.iter().all(|a| a.replicas.len() == 2) {
                settled = true;
                break;
            }
        }
        assert!(settled, "zone never picked up the new node");

        stop.send(true).unwrap();
        runner.await.unwrap();
    }
}
