pub mod call;
pub mod deploy;
pub mod deployments;

use anyhow::{Result, bail};
use filwizard::accounts::AccountsFile;

use crate::Config;

/// Deployer key: explicit flag, then `PRIVATE_KEY`, then the workspace's `accounts.json`.
pub fn deployer_key(explicit: Option<String>, config: &Config) -> Result<String> {
    if let Some(key) = explicit.or_else(|| config.private_key.clone()) {
        return Ok(key);
    }
    let accounts = AccountsFile::load(&AccountsFile::path_in(&config.workspace))?;
    match accounts.deployer_key() {
        Some(key) => Ok(key.to_string()),
        None => bail!(
            "no deployer key: pass --deployer-key, set PRIVATE_KEY or add a deployer to {}",
            AccountsFile::path_in(&config.workspace).display()
        ),
    }
}
