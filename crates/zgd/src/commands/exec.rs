use std::path::Path;

use tracing::info;

use zonegrid_core::config::MembershipConfig;

use super::open_node;

pub async fn run(data_dir: &Path, file: &Path) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(file)?;
    let node = open_node(data_dir, &MembershipConfig::default())?;

    let outcomes = node.cluster.execute_script(&source).await?;
    info!(statements = outcomes.len(), file = ?file, "script executed");
    for outcome in &outcomes {
        println!("{outcome}");
    }
    Ok(())
}
