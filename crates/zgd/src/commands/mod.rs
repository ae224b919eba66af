pub mod describe;
pub mod exec;
pub mod standalone;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use zonegrid_catalog::Catalog;
use zonegrid_cluster::{Cluster, MembershipManager};
use zonegrid_core::config::MembershipConfig;
use zonegrid_replica::{LocalTransport, ReplicaManager};
use zonegrid_state::StateStore;

/// Everything opened from one data directory.
pub struct Node {
    pub membership: Arc<MembershipManager>,
    pub cluster: Arc<Cluster>,
}

/// Open the state store under `data_dir` and rebuild the catalog and
/// replica assignments from it.
pub fn open_node(data_dir: &Path, membership: &MembershipConfig) -> anyhow::Result<Node> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("zonegrid.redb");

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let catalog = Arc::new(Catalog::open(state.clone())?);
    info!(
        zones = catalog.zones().list_zones().len(),
        tables = catalog.list_tables().len(),
        "catalog loaded"
    );

    let replicas = Arc::new(
        ReplicaManager::new(Arc::new(LocalTransport::new())).with_store(state.clone()),
    );
    let membership = Arc::new(MembershipManager::from_config(state.clone(), membership));
    let cluster = Arc::new(Cluster::new(catalog, replicas, membership.clone()));

    let restored = cluster.restore_assignments()?;
    info!(restored, "replica assignments restored");

    Ok(Node {
        membership,
        cluster,
    })
}
