use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::records::redact_key;

pub const ACCOUNTS_FILE: &str = "accounts.json";
pub const DEPLOYER_ROLE: &str = "deployer";

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Filecoin form of the account, when known.
    #[serde(default)]
    pub address: String,
    #[serde(rename = "ethAddress")]
    pub eth_address: String,
    #[serde(rename = "privateKey")]
    pub private_key: String,
}

impl fmt::Debug for AccountInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountInfo")
            .field("address", &self.address)
            .field("eth_address", &self.eth_address)
            .field("private_key", &redact_key(&self.private_key))
            .finish()
    }
}

/// `<workspace>/accounts.json`: named roles and their keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountsFile {
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountInfo>,
}

impl AccountsFile {
    pub fn path_in(workspace: &Path) -> PathBuf {
        workspace.join(ACCOUNTS_FILE)
    }

    /// A missing file reads as no accounts.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn deployer_key(&self) -> Option<&str> {
        self.accounts
            .get(DEPLOYER_ROLE)
            .map(|a| a.private_key.as_str())
            .filter(|k| !k.is_empty())
    }

    /// Store the deployer account at `path` unless one is already recorded. Returns whether
    /// the file was written.
    pub fn record_deployer(path: &Path, eth_address: Address, private_key: &str) -> Result<bool> {
        let mut file = Self::load(path)?;
        if file.accounts.contains_key(DEPLOYER_ROLE) {
            return Ok(false);
        }
        file.accounts.insert(
            DEPLOYER_ROLE.to_string(),
            AccountInfo {
                address: String::new(),
                eth_address: eth_address.to_string(),
                private_key: private_key.to_string(),
            },
        );
        file.save(path)?;
        info!(path = %path.display(), deployer = %eth_address, "recorded deployer account");
        Ok(true)
    }
}
