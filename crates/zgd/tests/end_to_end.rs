//! End-to-end scenarios across the catalog, replica, cluster and cache
//! crates, all in-process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use zonegrid_cache::{
    CacheAside, CacheStrategy, MemoryDeadLetters, MemorySource, MemoryStore, WriteBehind,
    WriteBehindConfig,
};
use zonegrid_catalog::{Catalog, CatalogError, Outcome, ZoneError};
use zonegrid_cluster::{Cluster, ClusterError, MembershipManager, TableKvStore};
use zonegrid_core::config::OverflowPolicy;
use zonegrid_core::{Row, Value};
use zonegrid_replica::{LocalTransport, ReplicaError, ReplicaManager};
use zonegrid_state::StateStore;

const MUSIC: &str = "
    CREATE ZONE IF NOT EXISTS MusicStore WITH REPLICAS=2, PARTITIONS=25, STORAGE_PROFILES='default';
    CREATE TABLE Artist (ArtistId INT PRIMARY KEY, Name VARCHAR(120)) WITH ZONE=MusicStore;
    CREATE TABLE Album (AlbumId INT, ArtistId INT, Title VARCHAR(160), PRIMARY KEY (AlbumId, ArtistId))
        WITH ZONE=MusicStore, COLOCATE_BY=(ArtistId), COLOCATE_WITH=Artist;
";

struct Node {
    cluster: Arc<Cluster>,
    transport: Arc<LocalTransport>,
}

fn cluster_of(nodes: &[&str], state: StateStore) -> Node {
    let membership = Arc::new(MembershipManager::new(state.clone()));
    for (i, n) in nodes.iter().enumerate() {
        membership
            .join(Some(n), "127.0.0.1", 5000 + i as u16, HashMap::new())
            .unwrap();
    }
    let transport = Arc::new(LocalTransport::new());
    let replicas = Arc::new(ReplicaManager::new(transport.clone()).with_store(state.clone()));
    let catalog = Arc::new(Catalog::open(state).unwrap());
    let cluster = Arc::new(Cluster::new(catalog, replicas, membership));
    cluster.restore_assignments().unwrap();
    Node { cluster, transport }
}

fn in_memory(nodes: &[&str]) -> Node {
    cluster_of(nodes, StateStore::open_in_memory().unwrap())
}

fn far() -> Instant {
    Instant::now() + Duration::from_secs(600)
}

#[tokio::test]
async fn music_store_rows_are_colocated() {
    let node = in_memory(&["n1", "n2", "n3"]);
    node.cluster.execute_script(MUSIC).await.unwrap();

    node.cluster
        .put_row(Row::new("Artist", vec![Value::Int32(1)], vec![Value::from("A")]))
        .await
        .unwrap();
    node.cluster
        .put_row(Row::new(
            "Album",
            vec![Value::Int32(10), Value::Int32(1)],
            vec![Value::from("X")],
        ))
        .await
        .unwrap();

    let artist = node.cluster.locate("Artist", &[Value::Int32(1)]).unwrap();
    let album = node
        .cluster
        .locate("Album", &[Value::Int32(10), Value::Int32(1)])
        .unwrap();
    assert_eq!(artist.0, "MUSICSTORE");
    assert_eq!(artist, album);

    let group = node.cluster.replicas().group(&artist.0, artist.1).unwrap();
    assert_eq!(group.replicas.len(), 2);
}

#[tokio::test]
async fn partition_count_cannot_change() {
    let node = in_memory(&["n1"]);
    node.cluster.execute_script(MUSIC).await.unwrap();

    let err = node
        .cluster
        .execute_script("ALTER ZONE MusicStore SET PARTITIONS=50")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClusterError::Catalog(CatalogError::Zone(ZoneError::ImmutableField { field: "partitions", .. }))
    ));
    let zone = node.cluster.catalog().zones().get_zone("MusicStore").unwrap();
    assert_eq!(zone.partitions, 25);
}

#[tokio::test]
async fn create_zone_if_not_exists_is_idempotent() {
    let node = in_memory(&["n1", "n2"]);
    let ddl = "CREATE ZONE IF NOT EXISTS Z WITH REPLICAS=2, PARTITIONS=8";

    let first = node.cluster.execute_script(ddl).await.unwrap();
    assert!(matches!(first[0], Outcome::ZoneCreated { .. }));
    let zone = node.cluster.catalog().zones().get_zone("Z").unwrap();
    let assignments = node.cluster.replicas().assignments("Z").unwrap();

    let second = node.cluster.execute_script(ddl).await.unwrap();
    assert!(matches!(second[0], Outcome::ZoneExists { .. }));
    assert_eq!(node.cluster.catalog().zones().get_zone("Z").unwrap(), zone);
    assert_eq!(node.cluster.replicas().assignments("Z").unwrap(), assignments);
}

#[tokio::test]
async fn cache_aside_over_a_table_loads_once() {
    let node = in_memory(&["n1", "n2"]);
    node.cluster
        .execute_script("CREATE TABLE Kv (K INT PRIMARY KEY, V VARCHAR)")
        .await
        .unwrap();

    let store = Arc::new(TableKvStore::new(node.cluster.clone(), "Kv"));
    let source = Arc::new(MemorySource::with_entries([(
        vec![Value::Int32(5)],
        vec![Value::from("v")],
    )]));
    let aside = CacheAside::new(store, source.clone());

    let key = vec![Value::Int32(5)];
    assert_eq!(aside.get(&key, far()).await.unwrap(), Some(vec![Value::from("v")]));
    assert_eq!(aside.get(&key, far()).await.unwrap(), Some(vec![Value::from("v")]));
    assert_eq!(source.load_calls(), 1);

    let cached = node.cluster.get_row("Kv", &key, None).await.unwrap().unwrap();
    assert_eq!(cached.value, vec![Value::from("v")]);
}

#[tokio::test(start_paused = true)]
async fn write_behind_flushes_on_interval() {
    let store = Arc::new(MemoryStore::<u32, String>::new());
    let source = Arc::new(MemorySource::<u32, String>::new());
    let dlq = Arc::new(MemoryDeadLetters::<u32, String>::new());
    let wb = WriteBehind::new(
        store.clone(),
        source.clone(),
        dlq,
        WriteBehindConfig {
            capacity: 100,
            batch_size: 10,
            flush_interval: Duration::from_secs(1),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            overflow: OverflowPolicy::Block,
        },
    );

    for i in 0..5 {
        wb.put(i, format!("item-{i}"), far()).await.unwrap();
    }
    assert_eq!(wb.get(&4, far()).await.unwrap(), Some("item-4".to_string()));

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(source.len(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(source.len(), 5);
    assert_eq!(source.peek(&2), Some("item-2".to_string()));

    wb.shutdown().await;
}

#[tokio::test]
async fn killed_primary_never_loses_a_write() {
    let node = in_memory(&["n1", "n2", "n3"]);
    node.cluster.execute_script(MUSIC).await.unwrap();

    let key = vec![Value::Int32(7)];
    let (zone, p) = node.cluster.locate("Artist", &key).unwrap();
    let primary = node.cluster.replicas().group(&zone, p).unwrap().replicas[0].clone();
    node.transport.kill(&primary);

    let err = node
        .cluster
        .put_row(Row::new("Artist", key.clone(), vec![Value::from("lost?")]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClusterError::Replica(ReplicaError::NoPrimaryAvailable { .. })
    ));
    assert!(err.is_retryable());

    let promotions = node.cluster.handle_node_failure(&primary);
    assert!(promotions
        .iter()
        .any(|pr| pr.zone == zone && pr.partition == p && pr.primary.is_some()));

    // The rejected write left nothing behind.
    assert!(node.cluster.get_row("Artist", &key, None).await.unwrap().is_none());

    node.cluster
        .put_row(Row::new("Artist", key.clone(), vec![Value::from("kept")]))
        .await
        .unwrap();
    let row = node.cluster.get_row("Artist", &key, None).await.unwrap().unwrap();
    assert_eq!(row.value, vec![Value::from("kept")]);
}

#[tokio::test]
async fn restart_restores_catalog_and_routing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zonegrid.redb");

    let (before, assignments) = {
        let node = cluster_of(&["n1", "n2"], StateStore::open(&path).unwrap());
        node.cluster.execute_script(MUSIC).await.unwrap();
        let located = node
            .cluster
            .locate("Album", &[Value::Int32(10), Value::Int32(3)])
            .unwrap();
        (located, node.cluster.replicas().assignments("MUSICSTORE").unwrap())
    };

    let node = cluster_of(&["n1", "n2"], StateStore::open(&path).unwrap());
    let after = node
        .cluster
        .locate("Album", &[Value::Int32(10), Value::Int32(3)])
        .unwrap();
    assert_eq!(before, after);

    let restored = node.cluster.replicas().assignments("MUSICSTORE").unwrap();
    let replicas = |a: &[zonegrid_state::PartitionAssignment]| {
        a.iter().map(|x| x.replicas.clone()).collect::<Vec<_>>()
    };
    assert_eq!(replicas(&restored), replicas(&assignments));
}
