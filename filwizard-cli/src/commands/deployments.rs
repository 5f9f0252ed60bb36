use anyhow::{Result, anyhow};
use filwizard::DeploymentTable;
use filwizard::records::redact_key;

use crate::Config;

pub fn list(config: &Config) -> Result<()> {
    let table = DeploymentTable::load(DeploymentTable::path_in(&config.workspace))?;
    if table.records().is_empty() {
        println!("no deployments in {}", table.path().display());
        return Ok(());
    }
    println!("{:<24} {:<42} {:<42} TX", "NAME", "ADDRESS", "DEPLOYER");
    for record in table.records() {
        let tx = record
            .txhash
            .map(|hash| hash.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<42} {:<42} {}",
            record.name, record.address, record.deployer_address, tx
        );
    }
    Ok(())
}

pub fn info(config: &Config, contract: &str) -> Result<()> {
    let table = DeploymentTable::load(DeploymentTable::path_in(&config.workspace))?;
    let mut record = table
        .find(contract)
        .cloned()
        .ok_or_else(|| anyhow!("no deployment named {contract} in {}", table.path().display()))?;
    record.deployer_private_key = redact_key(&record.deployer_private_key);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
