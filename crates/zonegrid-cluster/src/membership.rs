//! Membership manager: tracks cluster nodes.
//!
//! Persists node records to the `StateStore`, detects dead nodes from
//! missed heartbeats, and publishes the set of ready nodes to anyone
//! subscribed (the replica layer rebalances on every change).

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use zonegrid_core::NodeId;
use zonegrid_core::config::MembershipConfig;
use zonegrid_state::{NodeInfo, StateResult, StateStore};

/// Status of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Ready,
    Dead,
}

/// In-memory view of a cluster member.
#[derive(Debug, Clone)]
pub struct Member {
    pub node_id: NodeId,
    pub address: String,
    pub port: u16,
    pub status: MemberStatus,
    pub labels: HashMap<String, String>,
    pub last_heartbeat: u64,
}

/// Source of the live node set.
pub trait MembershipProvider: Send + Sync {
    /// Ready nodes, sorted.
    fn current_nodes(&self) -> Vec<NodeId>;

    /// Receives the ready node set after every change.
    fn subscribe(&self) -> watch::Receiver<Vec<NodeId>>;
}

/// Manages cluster membership state.
pub struct MembershipManager {
    state: StateStore,
    dead_timeout: Duration,
    heartbeat_interval: Duration,
    published: watch::Sender<Vec<NodeId>>,
}

impl MembershipManager {
    pub fn new(state: StateStore) -> Self {
        let (published, _) = watch::channel(Vec::new());
        let mgr = Self {
            state,
            dead_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            published,
        };
        mgr.publish();
        mgr
    }

    pub fn from_config(state: StateStore, config: &MembershipConfig) -> Self {
        Self::new(state)
            .with_dead_timeout(Duration::from_secs(config.dead_timeout_secs))
            .with_heartbeat_interval(Duration::from_secs(config.heartbeat_interval_secs))
    }

    /// Set the dead node detection timeout.
    pub fn with_dead_timeout(self, timeout: Duration) -> Self {
        let mgr = Self {
            dead_timeout: timeout,
            ..self
        };
        mgr.publish();
        mgr
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Register a node. Without an explicit id, one is derived from the
    /// address and port. Re-joining refreshes the record.
    pub fn join(
        &self,
        node_id: Option<&str>,
        address: &str,
        port: u16,
        labels: HashMap<String, String>,
    ) -> StateResult<NodeId> {
        let node_id = node_id
            .map(str::to_string)
            .unwrap_or_else(|| generate_node_id(address, port));

        let node = NodeInfo {
            id: node_id.clone(),
            address: address.to_string(),
            port,
            labels,
            last_heartbeat: epoch_secs(),
        };
        self.state.put_node(&node)?;
        info!(%node_id, %address, port, "node joined cluster");
        self.publish();
        Ok(node_id)
    }

    /// Record a heartbeat. Returns false for unknown nodes.
    pub fn heartbeat(&self, node_id: &str) -> StateResult<bool> {
        match self.state.get_node(node_id)? {
            Some(mut n) => {
                n.last_heartbeat = epoch_secs();
                self.state.put_node(&n)?;
                debug!(%node_id, "heartbeat received");
                self.publish();
                Ok(true)
            }
            None => {
                warn!(%node_id, "heartbeat from unknown node");
                Ok(false)
            }
        }
    }

    /// Remove a node from the cluster.
    pub fn leave(&self, node_id: &str) -> StateResult<bool> {
        let existed = self.state.delete_node(node_id)?;
        if existed {
            info!(%node_id, "node left cluster");
            self.publish();
        }
        Ok(existed)
    }

    pub fn list_members(&self) -> StateResult<Vec<Member>> {
        let now = epoch_secs();
        Ok(self
            .state
            .list_nodes()?
            .into_iter()
            .map(|n| self.member(n, now))
            .collect())
    }

    pub fn get_member(&self, node_id: &str) -> StateResult<Option<Member>> {
        let now = epoch_secs();
        Ok(self.state.get_node(node_id)?.map(|n| self.member(n, now)))
    }

    /// Detect and remove dead nodes. Returns the removed ids.
    pub fn reap_dead_nodes(&self) -> StateResult<Vec<NodeId>> {
        let mut reaped = Vec::new();
        for member in self.list_members()? {
            if member.status == MemberStatus::Dead {
                self.state.delete_node(&member.node_id)?;
                warn!(node_id = %member.node_id, "reaped dead node");
                reaped.push(member.node_id);
            }
        }
        if !reaped.is_empty() {
            self.publish();
        }
        Ok(reaped)
    }

    pub fn ready_count(&self) -> StateResult<usize> {
        Ok(self.ready_nodes()?.len())
    }

    pub fn ready_nodes(&self) -> StateResult<Vec<NodeId>> {
        let mut nodes: Vec<NodeId> = self
            .list_members()?
            .into_iter()
            .filter(|m| m.status == MemberStatus::Ready)
            .map(|m| m.node_id)
            .collect();
        nodes.sort();
        Ok(nodes)
    }

    fn member(&self, n: NodeInfo, now: u64) -> Member {
        let status = if now.saturating_sub(n.last_heartbeat) > self.dead_timeout.as_secs() {
            MemberStatus::Dead
        } else {
            MemberStatus::Ready
        };
        Member {
            node_id: n.id,
            address: n.address,
            port: n.port,
            status,
            labels: n.labels,
            last_heartbeat: n.last_heartbeat,
        }
    }

    /// Push the ready set to subscribers if it changed.
    fn publish(&self) {
        match self.ready_nodes() {
            Ok(nodes) => {
                self.published.send_if_modified(|current| {
                    if *current == nodes {
                        return false;
                    }
                    debug!(nodes = ?nodes, "membership changed");
                    *current = nodes;
                    true
                });
            }
            Err(e) => warn!(error = %e, "failed to read membership"),
        }
    }
}

impl MembershipProvider for MembershipManager {
    fn current_nodes(&self) -> Vec<NodeId> {
        self.published.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Vec<NodeId>> {
        self.published.subscribe()
    }
}

/// Generate a deterministic node ID from address and port.
fn generate_node_id(address: &str, port: u16) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    address.hash(&mut hasher);
    port.hash(&mut hasher);
    format!("node-{:08x}", hasher.finish() as u32)
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    #[test]
    fn join_creates_node() {
        let mgr = MembershipManager::new(test_state());
        let node_id = mgr.join(None, "10.0.0.1", 3344, HashMap::new()).unwrap();

        assert!(node_id.starts_with("node-"));
        let member = mgr.get_member(&node_id).unwrap().unwrap();
        assert_eq!(member.address, "10.0.0.1");
        assert_eq!(member.port, 3344);
        assert_eq!(member.status, MemberStatus::Ready);
    }

    #[test]
    fn join_is_stable_per_address() {
        let mgr = MembershipManager::new(test_state());
        let a = mgr.join(None, "10.0.0.1", 3344, HashMap::new()).unwrap();
        let b = mgr.join(None, "10.0.0.1", 3344, HashMap::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(mgr.ready_count().unwrap(), 1);

        let named = mgr.join(Some("n1"), "10.0.0.2", 3344, HashMap::new()).unwrap();
        assert_eq!(named, "n1");
    }

    #[test]
    fn heartbeat_unknown_node_returns_false() {
        let mgr = MembershipManager::new(test_state());
        assert!(!mgr.heartbeat("unknown").unwrap());
    }

    #[test]
    fn leave_removes_node() {
        let mgr = MembershipManager::new(test_state());
        let node_id = mgr.join(None, "10.0.0.1", 3344, HashMap::new()).unwrap();

        assert!(mgr.leave(&node_id).unwrap());
        assert!(mgr.get_member(&node_id).unwrap().is_none());
        assert!(!mgr.leave(&node_id).unwrap());
    }

    #[test]
    fn reap_dead_nodes() {
        let state = test_state();
        let mgr = MembershipManager::new(state.clone()).with_dead_timeout(Duration::from_secs(0));
        let node_id = mgr.join(Some("n1"), "10.0.0.1", 3344, HashMap::new()).unwrap();

        let mut node = state.get_node(&node_id).unwrap().unwrap();
        node.last_heartbeat = 1000;
        state.put_node(&node).unwrap();
        assert_eq!(mgr.get_member("n1").unwrap().unwrap().status, MemberStatus::Dead);

        assert_eq!(mgr.reap_dead_nodes().unwrap(), vec!["n1".to_string()]);
        assert!(mgr.list_members().unwrap().is_empty());
    }

    #[test]
    fn labels_preserved() {
        let mgr = MembershipManager::new(test_state());
        let labels = HashMap::from([("rack".to_string(), "r1".to_string())]);
        let node_id = mgr.join(None, "10.0.0.1", 3344, labels).unwrap();
        let member = mgr.get_member(&node_id).unwrap().unwrap();
        assert_eq!(member.labels.get("rack").unwrap(), "r1");
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let mgr = MembershipManager::new(test_state());
        let mut rx = mgr.subscribe();
        assert!(rx.borrow_and_update().is_empty());

        mgr.join(Some("n2"), "10.0.0.2", 3344, HashMap::new()).unwrap();
        mgr.join(Some("n1"), "10.0.0.1", 3344, HashMap::new()).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(mgr.current_nodes(), vec!["n1".to_string(), "n2".to_string()]);

        // A heartbeat that changes nothing is not republished.
        mgr.heartbeat("n1").unwrap();
        assert!(!rx.has_changed().unwrap());

        mgr.leave("n2").unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), vec!["n1".to_string()]);
    }
}
