//! Zone registry.
//!
//! Owns every zone definition. Mutations are serialised by a writer lock
//! and publish a fresh `Arc` snapshot, so readers never wait on a writer
//! and always see a consistent set of zones.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use zonegrid_core::config::ZoneConfig;
use zonegrid_core::{ConsistencyMode, ZoneId};
use zonegrid_state::{StateStore, ZoneDefinition};

use crate::error::{ZoneError, ZoneResult};
use crate::normalize_ident;

/// Upper bound on a zone's partition count.
pub const MAX_PARTITIONS: u32 = 65_000;

/// Name of the zone tables fall into when none is given.
pub const DEFAULT_ZONE: &str = "DEFAULT";

/// Parameters of a zone to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub name: String,
    pub replicas: u32,
    pub partitions: u32,
    pub storage_profile: String,
    pub consistency_mode: ConsistencyMode,
}

impl ZoneSpec {
    pub fn new(name: &str, replicas: u32, partitions: u32) -> Self {
        Self {
            name: name.to_string(),
            replicas,
            partitions,
            storage_profile: "default".to_string(),
            consistency_mode: ConsistencyMode::Strong,
        }
    }

    pub fn with_storage_profile(mut self, profile: &str) -> Self {
        self.storage_profile = profile.to_string();
        self
    }

    pub fn with_consistency(mut self, mode: ConsistencyMode) -> Self {
        self.consistency_mode = mode;
        self
    }

    /// The zone created implicitly for tables without a `ZONE` clause.
    pub fn default_zone() -> Self {
        Self::new(DEFAULT_ZONE, 1, 25)
    }
}

impl From<&ZoneConfig> for ZoneSpec {
    fn from(cfg: &ZoneConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            replicas: cfg.replicas,
            partitions: cfg.partitions,
            storage_profile: cfg.storage_profile.clone(),
            consistency_mode: cfg.consistency_mode,
        }
    }
}

/// Requested changes to an existing zone. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneAlter {
    pub replicas: Option<u32>,
    pub partitions: Option<u32>,
    pub storage_profile: Option<String>,
    pub consistency_mode: Option<ConsistencyMode>,
}

impl ZoneAlter {
    pub fn replicas(n: u32) -> Self {
        Self {
            replicas: Some(n),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    zones: BTreeMap<String, ZoneDefinition>,
    /// Number of tables referencing each zone.
    refs: HashMap<String, usize>,
    next_id: ZoneId,
}

/// Registry of zone definitions.
pub struct ZoneRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    store: Option<StateStore>,
}

impl ZoneRegistry {
    /// An in-memory registry with no persistence.
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot {
                next_id: 1,
                ..Snapshot::default()
            })),
            writer: Mutex::new(()),
            store: None,
        }
    }

    /// A registry backed by `store`, loading any persisted zones.
    pub fn open(store: StateStore) -> ZoneResult<Self> {
        let zones = store.list_zones()?;
        let next_id = zones.iter().map(|z| z.id).max().unwrap_or(0) + 1;
        let count = zones.len();
        let snapshot = Snapshot {
            zones: zones.into_iter().map(|z| (z.name.clone(), z)).collect(),
            refs: HashMap::new(),
            next_id,
        };
        debug!(zones = count, "zone registry loaded");
        Ok(Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            store: Some(store),
        })
    }

    /// Create a zone and return its id.
    ///
    /// With `if_not_exists`, an existing zone of the same name is left
    /// untouched and its id returned.
    pub fn create_zone(&self, spec: &ZoneSpec, if_not_exists: bool) -> ZoneResult<ZoneId> {
        self.create(spec, if_not_exists).map(|(zone, _)| zone.id)
    }

    /// Create a zone, reporting whether it was newly created.
    pub(crate) fn create(
        &self,
        spec: &ZoneSpec,
        if_not_exists: bool,
    ) -> ZoneResult<(ZoneDefinition, bool)> {
        let name = normalize_ident(&spec.name);
        validate(&name, spec.replicas, spec.partitions)?;

        let _guard = self.writer.lock();
        let current = self.snapshot();

        if let Some(existing) = current.zones.get(&name) {
            if !if_not_exists {
                return Err(ZoneError::AlreadyExists(name));
            }
            let requested = definition(existing.id, &name, spec);
            if !existing.same_parameters(&requested) {
                warn!(
                    zone = %name,
                    "zone exists with different parameters, keeping the existing definition"
                );
            }
            return Ok((existing.clone(), false));
        }

        let zone = definition(current.next_id, &name, spec);
        if let Some(store) = &self.store {
            store.put_zone(&zone)?;
        }

        let mut next = (*current).clone();
        next.zones.insert(name.clone(), zone.clone());
        next.next_id += 1;
        self.publish(next);

        info!(
            zone = %name,
            id = zone.id,
            replicas = zone.replicas,
            partitions = zone.partitions,
            storage_profile = %zone.storage_profile,
            consistency = %zone.consistency_mode,
            "zone created"
        );
        Ok((zone, true))
    }

    /// Apply `alter` to a zone and return the new definition.
    ///
    /// `replicas` may always change. `storage_profile` and
    /// `consistency_mode` may change only while no table references the
    /// zone. `partitions` never changes.
    pub fn alter_zone(&self, name: &str, alter: &ZoneAlter) -> ZoneResult<ZoneDefinition> {
        let name = normalize_ident(name);
        let _guard = self.writer.lock();
        let current = self.snapshot();

        let existing = current
            .zones
            .get(&name)
            .ok_or_else(|| ZoneError::NotFound(name.clone()))?;

        if alter.partitions.is_some() {
            return Err(ZoneError::ImmutableField {
                field: "partitions",
                hint: format!(
                    "the partition count is fixed at creation; drop and recreate zone {name} to change it"
                ),
            });
        }

        let tables = current.refs.get(&name).copied().unwrap_or(0);
        let mut updated = existing.clone();

        if let Some(replicas) = alter.replicas {
            validate(&name, replicas, updated.partitions)?;
            updated.replicas = replicas;
        }
        if let Some(profile) = &alter.storage_profile {
            if *profile != updated.storage_profile {
                if tables > 0 {
                    return Err(referenced("storage_profile", &name, tables));
                }
                updated.storage_profile = profile.clone();
            }
        }
        if let Some(mode) = alter.consistency_mode {
            if mode != updated.consistency_mode {
                if tables > 0 {
                    return Err(referenced("consistency_mode", &name, tables));
                }
                updated.consistency_mode = mode;
            }
        }

        if updated == *existing {
            debug!(zone = %name, "alter zone made no change");
            return Ok(updated);
        }

        if let Some(store) = &self.store {
            store.put_zone(&updated)?;
        }

        let mut next = (*current).clone();
        next.zones.insert(name.clone(), updated.clone());
        self.publish(next);

        info!(
            zone = %name,
            replicas = updated.replicas,
            storage_profile = %updated.storage_profile,
            consistency = %updated.consistency_mode,
            "zone altered"
        );
        Ok(updated)
    }

    /// Drop a zone. Returns the dropped definition, or `None` when the zone
    /// did not exist and `if_exists` was set.
    pub fn drop_zone(&self, name: &str, if_exists: bool) -> ZoneResult<Option<ZoneDefinition>> {
        let name = normalize_ident(name);
        let _guard = self.writer.lock();
        let current = self.snapshot();

        let Some(existing) = current.zones.get(&name) else {
            if if_exists {
                return Ok(None);
            }
            return Err(ZoneError::NotFound(name));
        };

        let tables = current.refs.get(&name).copied().unwrap_or(0);
        if tables > 0 {
            return Err(ZoneError::ZoneInUse { zone: name, tables });
        }

        if let Some(store) = &self.store {
            store.delete_zone(&name)?;
        }

        let dropped = existing.clone();
        let mut next = (*current).clone();
        next.zones.remove(&name);
        next.refs.remove(&name);
        self.publish(next);

        info!(zone = %name, id = dropped.id, "zone dropped");
        Ok(Some(dropped))
    }

    pub fn get_zone(&self, name: &str) -> Option<ZoneDefinition> {
        self.snapshot().zones.get(&normalize_ident(name)).cloned()
    }

    /// All zones, ordered by name.
    pub fn list_zones(&self) -> Vec<ZoneDefinition> {
        self.snapshot().zones.values().cloned().collect()
    }

    /// Number of tables referencing a zone.
    pub fn table_refs(&self, name: &str) -> usize {
        self.snapshot()
            .refs
            .get(&normalize_ident(name))
            .copied()
            .unwrap_or(0)
    }

    /// Record that a table references `name`.
    pub fn attach_table(&self, name: &str) -> ZoneResult<()> {
        let name = normalize_ident(name);
        let _guard = self.writer.lock();
        let current = self.snapshot();
        if !current.zones.contains_key(&name) {
            return Err(ZoneError::NotFound(name));
        }
        let mut next = (*current).clone();
        *next.refs.entry(name).or_insert(0) += 1;
        self.publish(next);
        Ok(())
    }

    /// Release a table reference on `name`.
    pub fn detach_table(&self, name: &str) {
        let name = normalize_ident(name);
        let _guard = self.writer.lock();
        let current = self.snapshot();
        let mut next = (*current).clone();
        if let Some(count) = next.refs.get_mut(&name) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                next.refs.remove(&name);
            }
        }
        self.publish(next);
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    fn publish(&self, next: Snapshot) {
        *self.snapshot.write() = Arc::new(next);
    }
}

impl Default for ZoneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn definition(id: ZoneId, name: &str, spec: &ZoneSpec) -> ZoneDefinition {
    ZoneDefinition {
        id,
        name: name.to_string(),
        replicas: spec.replicas,
        partitions: spec.partitions,
        storage_profile: spec.storage_profile.clone(),
        consistency_mode: spec.consistency_mode,
    }
}

fn validate(name: &str, replicas: u32, partitions: u32) -> ZoneResult<()> {
    if name.is_empty() {
        return Err(ZoneError::InvalidParameter("zone name is empty".to_string()));
    }
    if replicas == 0 {
        return Err(ZoneError::InvalidParameter(format!(
            "zone {name}: replicas must be at least 1"
        )));
    }
    if partitions == 0 || partitions > MAX_PARTITIONS {
        return Err(ZoneError::InvalidParameter(format!(
            "zone {name}: partitions must be in 1..={MAX_PARTITIONS}, got {partitions}"
        )));
    }
    Ok(())
}

fn referenced(field: &'static str, zone: &str, tables: usize) -> ZoneError {
    ZoneError::ImmutableField {
        field,
        hint: format!("zone {zone} is referenced by {tables} table(s)"),
    }
}
