use std::path::Path;

use serde::Serialize;

use zonegrid_catalog::{Catalog, normalize_ident};
use zonegrid_state::{PartitionAssignment, StateStore, TableSchema, ZoneDefinition};

#[derive(Debug, Serialize)]
pub struct ZoneReport {
    pub zone: ZoneDefinition,
    pub tables: Vec<TableSchema>,
    pub assignments: Vec<PartitionAssignment>,
}

pub fn run(data_dir: &Path, zone: Option<&str>) -> anyhow::Result<()> {
    let state = StateStore::open(&data_dir.join("zonegrid.redb"))?;
    let report = describe(&state, zone)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Collect zones, their tables and persisted assignments. Reads only;
/// nothing is assigned or rebalanced.
pub fn describe(state: &StateStore, zone: Option<&str>) -> anyhow::Result<Vec<ZoneReport>> {
    let catalog = Catalog::open(state.clone())?;
    let wanted = zone.map(normalize_ident);

    let mut zones = catalog.zones().list_zones();
    if let Some(name) = &wanted {
        zones.retain(|z| &z.name == name);
        if zones.is_empty() {
            anyhow::bail!("zone {name} not found");
        }
    }

    let tables = catalog.list_tables();
    let mut reports = Vec::with_capacity(zones.len());
    for zone in zones {
        let mut assignments = state.list_assignments_for_zone(&zone.name)?;
        assignments.sort_by_key(|a| a.partition);
        reports.push(ZoneReport {
            tables: tables.iter().filter(|t| t.zone == zone.name).cloned().collect(),
            assignments,
            zone,
        });
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::open_node;
    use zonegrid_core::config::MembershipConfig;

    #[tokio::test]
    async fn reports_zone_tables_and_assignments() {
        let dir = tempfile::tempdir().unwrap();
        {
            let node = open_node(dir.path(), &MembershipConfig::default()).unwrap();
            node.membership
                .join(Some("n1"), "127.0.0.1", 3344, Default::default())
                .unwrap();
            node.cluster
                .execute_script(
                    "CREATE ZONE Z WITH REPLICAS=1, PARTITIONS=4;
                     CREATE TABLE T (Id INT PRIMARY KEY, V VARCHAR) WITH ZONE=Z;",
                )
                .await
                .unwrap();
        }

        let state = StateStore::open(&dir.path().join("zonegrid.redb")).unwrap();
        let reports = describe(&state, Some("z")).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].zone.partitions, 4);
        assert_eq!(reports[0].tables[0].name, "T");
        assert_eq!(reports[0].assignments.len(), 4);
        assert!(reports[0].assignments.iter().all(|a| a.replicas == vec!["n1".to_string()]));

        assert!(describe(&state, Some("missing")).is_err());
    }
}
