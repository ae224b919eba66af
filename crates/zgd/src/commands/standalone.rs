use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use zonegrid_cluster::MembershipManager;
use zonegrid_core::config::{SeedNode, ZoneGridConfig};
use zonegrid_core::NodeId;

use super::open_node;

const LOCAL_ADDRESS: &str = "127.0.0.1";
const LOCAL_PORT: u16 = 3344;

pub async fn run(config: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => {
            info!(path = ?path, "loading configuration");
            ZoneGridConfig::from_file(path)?
        }
        None => ZoneGridConfig::default(),
    };
    let data_dir = data_dir.unwrap_or_else(|| config.node.data_dir.clone());

    info!("ZoneGrid daemon starting in standalone mode");

    let node = open_node(&data_dir, &config.membership)?;
    let cluster = node.cluster.clone();

    // ── Membership ─────────────────────────────────────────────

    let members = join_members(&node.membership, config.node.id.as_deref(), &config.membership.seeds)?;
    info!(members = ?members, "static membership joined");

    // ── Zones ──────────────────────────────────────────────────

    for outcome in cluster.bootstrap_zones(&config.zones).await? {
        info!(%outcome, "bootstrap zone");
    }
    cluster.rebalance_all().await;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let membership_cluster = cluster.clone();
    let membership_shutdown = shutdown_rx.clone();
    let membership_handle = tokio::spawn(async move {
        membership_cluster.run_membership_loop(membership_shutdown).await;
    });

    let heartbeat_handle = tokio::spawn(heartbeat_loop(
        node.membership.clone(),
        members,
        shutdown_rx.clone(),
    ));

    let reaper_handle = tokio::spawn(reaper_loop(
        node.membership.clone(),
        Duration::from_secs(config.membership.reap_interval_secs.max(1)),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = membership_handle.await;
    let _ = heartbeat_handle.await;
    let _ = reaper_handle.await;

    info!("ZoneGrid daemon stopped");
    Ok(())
}

/// Join the configured static node list. The first seed is this node and
/// takes the configured id; without seeds this node joins on loopback.
pub fn join_members(
    membership: &MembershipManager,
    node_id: Option<&str>,
    seeds: &[SeedNode],
) -> anyhow::Result<Vec<NodeId>> {
    if seeds.is_empty() {
        let id = membership.join(node_id, LOCAL_ADDRESS, LOCAL_PORT, HashMap::new())?;
        return Ok(vec![id]);
    }

    let mut joined = Vec::with_capacity(seeds.len());
    for (i, seed) in seeds.iter().enumerate() {
        let id = if i == 0 { node_id } else { None };
        joined.push(membership.join(id, &seed.address, seed.port, HashMap::new())?);
    }
    Ok(joined)
}

/// Keep the static members alive. Standalone nodes have no remote peers
/// sending heartbeats of their own.
async fn heartbeat_loop(
    membership: Arc<MembershipManager>,
    members: Vec<NodeId>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(membership.heartbeat_interval().max(Duration::from_millis(100)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for id in &members {
                    if let Err(e) = membership.heartbeat(id) {
                        warn!(node_id = %id, error = %e, "heartbeat failed");
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn reaper_loop(
    membership: Arc<MembershipManager>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => match membership.reap_dead_nodes() {
                Ok(reaped) if !reaped.is_empty() => info!(reaped = ?reaped, "dead nodes reaped"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "reaper failed"),
            },
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonegrid_cluster::MembershipProvider;
    use zonegrid_state::StateStore;

    fn manager() -> MembershipManager {
        MembershipManager::new(StateStore::open_in_memory().unwrap())
    }

    #[test]
    fn first_seed_takes_node_id() {
        let mgr = manager();
        let seeds = vec![
            SeedNode {
                address: "10.0.0.1".to_string(),
                port: 3344,
            },
            SeedNode {
                address: "10.0.0.2".to_string(),
                port: 3344,
            },
        ];
        let joined = join_members(&mgr, Some("node-1"), &seeds).unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(joined[0], "node-1");
        assert!(joined[1].starts_with("node-"));
        assert_eq!(mgr.current_nodes().len(), 2);
    }

    #[test]
    fn no_seeds_joins_loopback() {
        let mgr = manager();
        let joined = join_members(&mgr, None, &[]).unwrap();
        let member = mgr.get_member(&joined[0]).unwrap().unwrap();
        assert_eq!(member.address, LOCAL_ADDRESS);
        assert_eq!(member.port, LOCAL_PORT);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_stop_on_shutdown() {
        let mgr = Arc::new(manager().with_heartbeat_interval(Duration::from_secs(1)));
        let members = join_members(&mgr, Some("n1"), &[]).unwrap();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(heartbeat_loop(mgr.clone(), members, rx));
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(mgr.get_member("n1").unwrap().is_some());
    }
}
