//! Replica-group manager.
//!
//! Single owner of partition-to-replica assignments. For every zone it
//! keeps one [`PartitionGroup`] per partition, each behind its own lock,
//! and routes reads and writes to the right replicas.
//!
//! Membership changes go through [`ReplicaManager::rebalance`], which is
//! serialised per zone and moves partitions one at a time without ever
//! leaving a partition with no serving replica.
//!
//! A write is acknowledged only if the replica set it was routed to still
//! serves the partition when it completes; otherwise it is re-sent, with
//! its original sequence, to the new set. A rejected write is reverted
//! on every replica that applied it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use zonegrid_core::{ConsistencyMode, NodeId, PartitionId, Value};
use zonegrid_placement::{AssignmentPlan, compute_assignment};
use zonegrid_state::{PartitionAssignment, PartitionState, StateStore, ZoneDefinition};

use crate::balancer::RoundRobinBalancer;
use crate::error::{ReplicaError, ReplicaResult};
use crate::group::PartitionGroup;
use crate::rebalance::{PartitionRebalance, RebalancePhase, RebalanceReport};
use crate::transport::{ReplicaTransport, ReplicatedWrite, WriteOp};

/// Routes a single write may be sent along before it gives up.
const MAX_WRITE_ROUTES: usize = 4;

/// Where a write goes and how many backups must confirm it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteRoute {
    pub zone: String,
    pub partition: PartitionId,
    pub primary: NodeId,
    pub backups: Vec<NodeId>,
    pub acks_required: usize,
    pub seq: u64,
}

/// Backup acknowledgements a write waits for under `mode`.
pub fn acks_required(mode: ConsistencyMode, backups: usize) -> usize {
    match mode {
        ConsistencyMode::Strong => backups,
        ConsistencyMode::Eventual => backups.min(1),
        ConsistencyMode::Weak => 0,
    }
}

/// Outcome of a replicated write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub primary: NodeId,
    pub seq: u64,
    /// Backups that had acknowledged when the write returned.
    pub acked: usize,
}

struct ZoneReplicas {
    zone: RwLock<ZoneDefinition>,
    groups: Vec<Mutex<PartitionGroup>>,
    nodes: RwLock<Vec<NodeId>>,
    balancer: RoundRobinBalancer,
    retired: AtomicBool,
    /// Held for the whole of a rebalance.
    membership: tokio::sync::Mutex<()>,
}

impl ZoneReplicas {
    fn new(zone: ZoneDefinition, groups: Vec<PartitionGroup>, nodes: Vec<NodeId>) -> Self {
        Self {
            zone: RwLock::new(zone),
            groups: groups.into_iter().map(Mutex::new).collect(),
            nodes: RwLock::new(nodes),
            balancer: RoundRobinBalancer::new(),
            retired: AtomicBool::new(false),
            membership: tokio::sync::Mutex::new(()),
        }
    }

    fn name(&self) -> String {
        self.zone.read().name.clone()
    }

    fn group(&self, partition: PartitionId) -> ReplicaResult<&Mutex<PartitionGroup>> {
        self.groups
            .get(partition as usize)
            .ok_or_else(|| ReplicaError::PartitionOutOfRange {
                zone: self.name(),
                partition,
            })
    }

    fn assignments(&self) -> Vec<PartitionAssignment> {
        let name = self.name();
        self.groups
            .iter()
            .map(|g| g.lock().to_assignment(&name))
            .collect()
    }
}

/// Owns the replica groups of every zone.
pub struct ReplicaManager {
    zones: RwLock<HashMap<String, Arc<ZoneReplicas>>>,
    transport: Arc<dyn ReplicaTransport>,
    store: Option<StateStore>,
}

impl ReplicaManager {
    pub fn new(transport: Arc<dyn ReplicaTransport>) -> Self {
        Self {
            zones: RwLock::new(HashMap::new()),
            transport,
            store: None,
        }
    }

    /// Persist every assignment flip to `store`.
    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(&self) -> &Arc<dyn ReplicaTransport> {
        &self.transport
    }

    /// Initial assignment of a freshly created zone.
    ///
    /// Partitions start empty, so no data moves. Calling this again for a
    /// live zone returns its current assignment unchanged.
    pub fn assign(&self, zone: &ZoneDefinition, nodes: &[NodeId]) -> ReplicaResult<AssignmentPlan> {
        if let Some(existing) = self.live_zone(&zone.name) {
            debug!(zone = %zone.name, "zone already assigned");
            return Ok(plan_of(&existing));
        }

        let plan = compute_assignment(zone, nodes);
        let groups: Vec<PartitionGroup> = plan
            .partitions
            .iter()
            .enumerate()
            .map(|(p, replicas)| {
                if replicas.is_empty() {
                    PartitionGroup::unassigned(p as PartitionId)
                } else {
                    PartitionGroup::assigned(p as PartitionId, replicas.clone(), plan.degraded)
                }
            })
            .collect();

        let replicas = Arc::new(ZoneReplicas::new(zone.clone(), groups, nodes.to_vec()));
        self.persist_all(&replicas)?;
        self.zones.write().insert(zone.name.clone(), replicas);

        info!(
            zone = %zone.name,
            partitions = zone.partitions,
            nodes = nodes.len(),
            degraded = plan.degraded,
            "zone assigned"
        );
        Ok(plan)
    }

    /// Reload a zone's assignment from the state store.
    ///
    /// Returns false when nothing was persisted for the zone.
    pub fn restore(&self, zone: &ZoneDefinition) -> ReplicaResult<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let persisted = store.list_assignments_for_zone(&zone.name)?;
        if persisted.is_empty() {
            return Ok(false);
        }

        let mut groups: Vec<PartitionGroup> = (0..zone.partitions)
            .map(PartitionGroup::unassigned)
            .collect();
        let mut nodes: Vec<NodeId> = Vec::new();
        for a in &persisted {
            if let Some(slot) = groups.get_mut(a.partition as usize) {
                *slot = PartitionGroup::from_assignment(a, zone.replicas);
            }
            for n in &a.replicas {
                if !nodes.contains(n) {
                    nodes.push(n.clone());
                }
            }
        }
        nodes.sort();

        let replicas = Arc::new(ZoneReplicas::new(zone.clone(), groups, nodes));
        self.zones.write().insert(zone.name.clone(), replicas);
        info!(zone = %zone.name, partitions = persisted.len(), "assignment restored");
        Ok(true)
    }

    /// Update a zone's definition (e.g. a new replica count). Takes effect
    /// on the next rebalance.
    pub fn update_zone(&self, zone: &ZoneDefinition) -> ReplicaResult<()> {
        let replicas = self.zone(&zone.name)?;
        *replicas.zone.write() = zone.clone();
        Ok(())
    }

    /// Move a zone onto `nodes`.
    ///
    /// Partitions move one at a time; each copies to its new replicas in
    /// batches and flips only once every copy has landed. A partition
    /// whose copy fails keeps its old serving set and is reported in
    /// `failed`. Routing to unaffected partitions is never blocked.
    ///
    /// An empty node set is refused with `NoNodes`: there would be nowhere
    /// to move the data, and the current serving sets stay in place.
    pub async fn rebalance(&self, zone: &str, nodes: &[NodeId]) -> ReplicaResult<RebalanceReport> {
        let replicas = self.zone(zone)?;
        let _membership = replicas.membership.lock().await;
        if replicas.retired.load(Ordering::Acquire) {
            return Err(ReplicaError::ZoneRetired(zone.to_string()));
        }
        if nodes.is_empty() {
            warn!(%zone, "rebalance onto an empty node set refused");
            return Err(ReplicaError::NoNodes(zone.to_string()));
        }

        let definition = replicas.zone.read().clone();
        let plan = compute_assignment(&definition, nodes);
        *replicas.nodes.write() = plan_nodes(nodes);

        let mut report = RebalanceReport {
            zone: definition.name.clone(),
            degraded: plan.degraded,
            ..RebalanceReport::default()
        };

        info!(
            zone = %definition.name,
            nodes = nodes.len(),
            replicas = definition.replicas,
            "rebalance started"
        );

        for (p, target) in plan.partitions.iter().enumerate() {
            let partition = p as PartitionId;
            let group = replicas.group(partition)?;
            let current = group.lock().replicas.clone();
            if current == *target {
                let mut g = group.lock();
                if g.degraded != plan.degraded {
                    g.degraded = plan.degraded;
                }
                continue;
            }

            let mut mv = PartitionRebalance::new(
                &definition.name,
                partition,
                current,
                target.clone(),
                definition.replicas,
            );
            match self.move_partition(&replicas, &mut mv, plan.degraded).await {
                Ok(copied) => {
                    report.moved += 1;
                    report.copied += copied;
                }
                Err(e) => {
                    mv.abort(e.to_string());
                    let mut g = group.lock();
                    g.state = if g.replicas.is_empty() {
                        PartitionState::Unassigned
                    } else {
                        PartitionState::Assigned
                    };
                    g.catching_up.clear();
                    g.target.clear();
                    report.failed.push((partition, e.to_string()));
                }
            }
        }

        info!(
            zone = %definition.name,
            moved = report.moved,
            copied = report.copied,
            failed = report.failed.len(),
            degraded = report.degraded,
            "rebalance finished"
        );
        Ok(report)
    }

    async fn move_partition(
        &self,
        replicas: &ZoneReplicas,
        mv: &mut PartitionRebalance,
        degraded: bool,
    ) -> ReplicaResult<usize> {
        let group = replicas.group(mv.partition)?;
        let zone = mv.zone.clone();

        {
            let mut g = group.lock();
            g.state = PartitionState::Rebalancing;
            g.target = mv.to.clone();
            self.persist(&g.to_assignment(&zone))?;
        }

        mv.start();
        let mut copied = 0;
        while let Some(batch) = mv.next_batch() {
            group.lock().catching_up.extend(batch.iter().cloned());

            for node in &batch {
                let source = {
                    let g = group.lock();
                    g.replicas
                        .iter()
                        .find(|n| *n != node && self.transport.is_alive(n))
                        .cloned()
                };
                match source {
                    Some(source) => {
                        let entries = self
                            .transport
                            .copy_partition(&source, node, &zone, mv.partition)
                            .await?;
                        debug!(
                            zone = %zone,
                            partition = mv.partition,
                            from = %source,
                            to = %node,
                            entries,
                            "replica caught up"
                        );
                        copied += 1;
                    }
                    // Nothing serves the partition yet, so there is nothing to copy.
                    None if group.lock().replicas.is_empty() => {}
                    None => {
                        return Err(ReplicaError::NoSourceReplica {
                            zone: zone.clone(),
                            partition: mv.partition,
                        });
                    }
                }
            }
        }

        debug_assert_eq!(mv.phase, RebalancePhase::Flipping);
        if mv.to.is_empty() {
            return Err(ReplicaError::NoNodes(zone));
        }
        {
            let mut g = group.lock();
            g.set_serving(mv.to.clone(), degraded);
            self.persist(&g.to_assignment(&zone))?;
        }
        mv.complete();
        Ok(copied)
    }

    /// Drop a failed node from every serving set.
    ///
    /// Partitions it led lose their primary and reject writes until
    /// [`ReplicaManager::confirm_primary`] names a successor. A node that
    /// was a partition's only replica stays listed until it is confirmed
    /// again or the partition moves. Returns the `(zone, partition)` pairs
    /// that lost their primary.
    pub fn node_failed(&self, node: &str) -> Vec<(String, PartitionId)> {
        let zones: Vec<Arc<ZoneReplicas>> = self.zones.read().values().cloned().collect();
        let mut orphaned = Vec::new();

        for replicas in zones {
            let zone = replicas.name();
            replicas.nodes.write().retain(|n| n != node);
            for group in &replicas.groups {
                let mut g = group.lock();
                if !g.replicas.iter().any(|n| n == node)
                    && !g.catching_up.iter().any(|n| n == node)
                {
                    continue;
                }
                if g.remove_node(node) {
                    warn!(zone = %zone, partition = g.partition, %node, "primary lost");
                    orphaned.push((zone.clone(), g.partition));
                }
                if let Err(e) = self.persist(&g.to_assignment(&zone)) {
                    warn!(zone = %zone, partition = g.partition, error = %e, "failed to persist assignment");
                }
            }
        }
        orphaned
    }

    /// Confirm `node` as the new primary of a partition.
    pub fn confirm_primary(&self, zone: &str, partition: PartitionId, node: &str) -> ReplicaResult<()> {
        let replicas = self.live(zone)?;
        let group = replicas.group(partition)?;
        let mut g = group.lock();

        if !self.transport.is_alive(node) || !g.promote(node) {
            return Err(ReplicaError::NotReplica {
                zone: zone.to_string(),
                partition,
                node: node.to_string(),
            });
        }
        self.persist(&g.to_assignment(zone))?;
        info!(%zone, partition, %node, "primary confirmed");
        Ok(())
    }

    /// Node to read from under `mode`.
    ///
    /// `STRONG` reads go to the confirmed primary only; `EVENTUAL` and
    /// `WEAK` reads rotate over the live serving replicas.
    pub fn route_read(
        &self,
        zone: &str,
        partition: PartitionId,
        mode: ConsistencyMode,
    ) -> ReplicaResult<NodeId> {
        let replicas = self.live(zone)?;
        let g = replicas.group(partition)?.lock();

        match mode {
            ConsistencyMode::Strong => g.primary().cloned().ok_or_else(|| {
                ReplicaError::NoPrimaryAvailable {
                    zone: zone.to_string(),
                    partition,
                }
            }),
            ConsistencyMode::Eventual | ConsistencyMode::Weak => replicas
                .balancer
                .pick(&g.replicas, |n| self.transport.is_alive(n))
                .cloned()
                .ok_or_else(|| ReplicaError::NoReplicaAvailable {
                    zone: zone.to_string(),
                    partition,
                }),
        }
    }

    /// Route a write to the partition's primary.
    ///
    /// Assigns the write its sequence number, which fixes its order
    /// among writes to the same partition.
    pub fn route_write(&self, zone: &str, partition: PartitionId) -> ReplicaResult<WriteRoute> {
        self.route(zone, partition, None)
    }

    /// Route a write, reusing `seq` when it is being re-sent.
    fn route(&self, zone: &str, partition: PartitionId, seq: Option<u64>) -> ReplicaResult<WriteRoute> {
        let replicas = self.live(zone)?;
        let mode = replicas.zone.read().consistency_mode;
        let mut g = replicas.group(partition)?.lock();

        let primary = g
            .primary()
            .cloned()
            .ok_or_else(|| ReplicaError::NoPrimaryAvailable {
                zone: zone.to_string(),
                partition,
            })?;
        let backups = g.write_followers();
        let required = acks_required(mode, g.backups().count());
        let seq = match seq {
            Some(seq) => seq,
            None => g.next_seq(),
        };

        Ok(WriteRoute {
            zone: zone.to_string(),
            partition,
            primary,
            backups,
            acks_required: required,
            seq,
        })
    }

    /// Route and replicate one write.
    ///
    /// The primary applies first; backups are fanned out in parallel and
    /// the call returns once the route's required acks are in. Remaining
    /// backups complete in the background. A primary that turns out to be
    /// down is failed and the write is rejected with `NoPrimaryAvailable`.
    ///
    /// A write whose replica set changed while it was in flight is re-sent
    /// to the new set. A write that ends in an error is reverted on every
    /// replica known to have applied it.
    pub async fn write(
        &self,
        zone: &str,
        partition: PartitionId,
        table: &str,
        key: Vec<Value>,
        op: WriteOp,
    ) -> ReplicaResult<WriteAck> {
        let route = self.route_write(zone, partition)?;
        let write = Arc::new(ReplicatedWrite {
            table: table.to_string(),
            key,
            op,
            seq: route.seq,
        });

        let mut applied = Vec::new();
        let result = self.replicate(route, &write, &mut applied).await;
        if let Err(e) = &result {
            if !applied.is_empty() {
                warn!(%zone, partition, seq = write.seq, error = %e, "write rejected, reverting");
                self.revert(zone, partition, &write, &applied).await;
            }
        }
        result
    }

    async fn replicate(
        &self,
        mut route: WriteRoute,
        write: &Arc<ReplicatedWrite>,
        applied: &mut Vec<NodeId>,
    ) -> ReplicaResult<WriteAck> {
        let (zone, partition) = (route.zone.clone(), route.partition);

        for attempt in 1..=MAX_WRITE_ROUTES {
            match self.transport.apply(&route.primary, &zone, partition, write).await {
                Ok(()) => note_applied(applied, &route.primary),
                Err(ReplicaError::NodeDown(node)) => {
                    self.node_failed(&node);
                    return Err(ReplicaError::NoPrimaryAvailable { zone, partition });
                }
                Err(e) => return Err(e),
            }

            let mut fan_out = FanOut::start(self.transport.clone(), &route, write.clone());
            fan_out.wait_for(route.acks_required).await;

            if self.still_routed(&route)? {
                if fan_out.acked.len() < route.acks_required {
                    fan_out.drain().await;
                    for node in &fan_out.acked {
                        note_applied(applied, node);
                    }
                    return Err(ReplicaError::InsufficientAcks {
                        required: route.acks_required,
                        received: fan_out.acked.len(),
                    });
                }
                return Ok(WriteAck {
                    primary: route.primary,
                    seq: route.seq,
                    acked: fan_out.acked.len(),
                });
            }

            // The replica set moved under the write. Settle what was sent
            // and re-send to the new set with the same sequence.
            fan_out.drain().await;
            for node in &fan_out.acked {
                note_applied(applied, node);
            }
            debug!(%zone, partition, seq = route.seq, attempt, "replica set changed during write, re-routing");
            route = self.route(&zone, partition, Some(route.seq))?;
        }

        Err(ReplicaError::RouteUnstable { zone, partition })
    }

    /// True while `route` still covers the partition's write targets: the
    /// same confirmed primary, and no follower the route did not send to.
    fn still_routed(&self, route: &WriteRoute) -> ReplicaResult<bool> {
        let replicas = self.live(&route.zone)?;
        let g = replicas.group(route.partition)?.lock();
        Ok(g.primary() == Some(&route.primary)
            && g.write_followers().iter().all(|n| route.backups.contains(n)))
    }

    async fn revert(&self, zone: &str, partition: PartitionId, write: &ReplicatedWrite, nodes: &[NodeId]) {
        for node in nodes {
            if let Err(e) = self.transport.revert(node, zone, partition, write).await {
                warn!(%zone, partition, %node, seq = write.seq, error = %e, "failed to revert write");
            }
        }
    }

    /// Read one row under `mode`.
    pub async fn read(
        &self,
        zone: &str,
        partition: PartitionId,
        table: &str,
        key: &[Value],
        mode: ConsistencyMode,
    ) -> ReplicaResult<Option<Vec<Value>>> {
        let node = self.route_read(zone, partition, mode)?;
        match self.transport.read(&node, zone, partition, table, key).await {
            Err(ReplicaError::NodeDown(node)) => {
                self.node_failed(&node);
                Err(match mode {
                    ConsistencyMode::Strong => ReplicaError::NoPrimaryAvailable {
                        zone: zone.to_string(),
                        partition,
                    },
                    _ => ReplicaError::NoReplicaAvailable {
                        zone: zone.to_string(),
                        partition,
                    },
                })
            }
            other => other,
        }
    }

    /// Drop the rows of a dropped table from every replica.
    pub fn purge_table(&self, zone: &str, table: &str) {
        self.transport.purge_table(zone, table);
        info!(%zone, %table, "table rows purged");
    }

    /// Retire every partition of a dropped zone.
    pub fn retire_zone(&self, zone: &str) -> ReplicaResult<()> {
        let replicas = self.zone(zone)?;
        replicas.retired.store(true, Ordering::Release);
        for group in &replicas.groups {
            let mut g = group.lock();
            g.state = PartitionState::Retired;
            g.catching_up.clear();
            g.target.clear();
        }
        self.transport.purge_zone(zone);
        if let Some(store) = &self.store {
            store.delete_assignments_for_zone(zone)?;
        }
        info!(%zone, "zone retired");
        Ok(())
    }

    /// Snapshot of one partition's group.
    pub fn group(&self, zone: &str, partition: PartitionId) -> ReplicaResult<PartitionGroup> {
        let replicas = self.zone(zone)?;
        let g = replicas.group(partition)?.lock().clone();
        Ok(g)
    }

    /// Current assignment of every partition in a zone.
    pub fn assignments(&self, zone: &str) -> ReplicaResult<Vec<PartitionAssignment>> {
        Ok(self.zone(zone)?.assignments())
    }

    /// Nodes the zone was last assigned over.
    pub fn zone_nodes(&self, zone: &str) -> ReplicaResult<Vec<NodeId>> {
        Ok(self.zone(zone)?.nodes.read().clone())
    }

    /// Partitions that still have serving replicas but no confirmed primary.
    pub fn leaderless(&self) -> Vec<(String, PartitionId)> {
        let zones: Vec<Arc<ZoneReplicas>> = self
            .zones
            .read()
            .values()
            .filter(|z| !z.retired.load(Ordering::Acquire))
            .cloned()
            .collect();
        let mut out = Vec::new();
        for replicas in zones {
            let zone = replicas.name();
            for group in &replicas.groups {
                let g = group.lock();
                if !g.primary_confirmed && !g.replicas.is_empty() {
                    out.push((zone.clone(), g.partition));
                }
            }
        }
        out.sort();
        out
    }

    /// Names of zones that are assigned and not retired.
    pub fn zone_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .zones
            .read()
            .iter()
            .filter(|(_, z)| !z.retired.load(Ordering::Acquire))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn zone(&self, zone: &str) -> ReplicaResult<Arc<ZoneReplicas>> {
        self.zones
            .read()
            .get(zone)
            .cloned()
            .ok_or_else(|| ReplicaError::ZoneNotFound(zone.to_string()))
    }

    fn live(&self, zone: &str) -> ReplicaResult<Arc<ZoneReplicas>> {
        let replicas = self.zone(zone)?;
        if replicas.retired.load(Ordering::Acquire) {
            return Err(ReplicaError::ZoneRetired(zone.to_string()));
        }
        Ok(replicas)
    }

    fn live_zone(&self, zone: &str) -> Option<Arc<ZoneReplicas>> {
        self.live(zone).ok()
    }

    fn persist(&self, assignment: &PartitionAssignment) -> ReplicaResult<()> {
        if let Some(store) = &self.store {
            store.put_assignment(assignment)?;
        }
        Ok(())
    }

    fn persist_all(&self, replicas: &ZoneReplicas) -> ReplicaResult<()> {
        if let Some(store) = &self.store {
            store.put_assignments(&replicas.assignments())?;
        }
        Ok(())
    }
}

fn plan_of(replicas: &ZoneReplicas) -> AssignmentPlan {
    let zone = replicas.zone.read().clone();
    let partitions: Vec<Vec<NodeId>> = replicas
        .groups
        .iter()
        .map(|g| g.lock().replicas.clone())
        .collect();
    let degraded = replicas.groups.iter().any(|g| g.lock().degraded);
    AssignmentPlan {
        zone: zone.name,
        replicas: zone.replicas,
        partitions,
        degraded,
    }
}

/// Backup fan-out of one write. Each backup's answer arrives on `rx`.
struct FanOut {
    rx: mpsc::Receiver<(NodeId, bool)>,
    pending: usize,
    acked: Vec<NodeId>,
}

impl FanOut {
    fn start(transport: Arc<dyn ReplicaTransport>, route: &WriteRoute, write: Arc<ReplicatedWrite>) -> Self {
        let (tx, rx) = mpsc::channel(route.backups.len().max(1));
        for node in &route.backups {
            let tx = tx.clone();
            let transport = transport.clone();
            let write = write.clone();
            let node = node.clone();
            let zone = route.zone.clone();
            let partition = route.partition;
            tokio::spawn(async move {
                let result = transport.apply(&node, &zone, partition, &write).await;
                if let Err(e) = &result {
                    debug!(%zone, partition, %node, error = %e, "backup apply failed");
                }
                let _ = tx.send((node, result.is_ok())).await;
            });
        }
        Self {
            rx,
            pending: route.backups.len(),
            acked: Vec::new(),
        }
    }

    /// Wait until `required` backups acked, or until that can no longer
    /// happen.
    async fn wait_for(&mut self, required: usize) {
        while self.acked.len() < required && self.pending >= required - self.acked.len() {
            if !self.recv().await {
                break;
            }
        }
    }

    /// Wait for every outstanding backup.
    async fn drain(&mut self) {
        while self.pending > 0 && self.recv().await {}
    }

    async fn recv(&mut self) -> bool {
        match self.rx.recv().await {
            Some((node, ok)) => {
                self.pending -= 1;
                if ok {
                    self.acked.push(node);
                }
                true
            }
            None => {
                self.pending = 0;
                false
            }
        }
    }
}

fn note_applied(applied: &mut Vec<NodeId>, node: &NodeId) {
    if !applied.contains(node) {
        applied.push(node.clone());
    }
}

fn plan_nodes(nodes: &[NodeId]) -> Vec<NodeId> {
    let mut nodes = nodes.to_vec();
    nodes.sort();
    nodes.dedup();
    nodes
}
