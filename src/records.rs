use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use alloy::primitives::{Address, TxHash};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::error::Result;

pub const DEPLOYMENTS_FILE: &str = "deployments.json";

static NAME_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*([A-Za-z0-9_\-]+)[:\s]+(0x[0-9a-fA-F]{40})").expect("static regex")
});
static ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[0-9a-fA-F]{40}").expect("static regex"));

/// The persisted outcome of one successful deployment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub name: String,
    pub address: Address,
    pub deployer_address: Address,
    #[serde(default)]
    pub deployer_private_key: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub txhash: Option<TxHash>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub abi_path: Option<PathBuf>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub bindings_path: Option<PathBuf>,
}

impl fmt::Debug for DeploymentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentRecord")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("deployer_address", &self.deployer_address)
            .field("deployer_private_key", &redact_key(&self.deployer_private_key))
            .field("txhash", &self.txhash)
            .field("abi_path", &self.abi_path)
            .field("bindings_path", &self.bindings_path)
            .finish()
    }
}

/// Shorten a private key to a prefix that is safe to print.
pub fn redact_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    let prefix: String = key.chars().take(6).collect();
    format!("{prefix}…(redacted)")
}

/// Older tables write `""` or an all-zero hash for fields they did not know.
fn empty_as_none<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if is_zero_hex(s) => Ok(None),
        Some(s) => T::from_str(s).map(Some).map_err(serde::de::Error::custom),
    }
}

fn is_zero_hex(s: &str) -> bool {
    s.strip_prefix("0x")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b == b'0'))
}

/// The deployment table, `<workspace>/deployments.json`. Always rewritten as a whole file.
#[derive(Debug, Clone)]
pub struct DeploymentTable {
    path: PathBuf,
    records: Vec<DeploymentRecord>,
}

impl DeploymentTable {
    pub fn path_in(workspace: &Path) -> PathBuf {
        workspace.join(DEPLOYMENTS_FILE)
    }

    /// Load the table at `path`. A missing or empty file is an empty table.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(data) if data.trim().is_empty() => Vec::new(),
            Ok(data) => serde_json::from_str(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), count = records.len(), "loaded deployment table");
        Ok(Self { path, records })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_string_pretty(&self.records)?;
        fs::write(&self.path, data)?;
        debug!(path = %self.path.display(), count = self.records.len(), "saved deployment table");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[DeploymentRecord] {
        &self.records
    }

    /// Latest record for `name`, compared case-insensitively.
    pub fn find(&self, name: &str) -> Option<&DeploymentRecord> {
        find_record(&self.records, name)
    }

    pub fn append(&mut self, record: DeploymentRecord) {
        self.records.push(record);
    }

    /// Replace the record with the same (case-insensitive) name in place, or append it.
    pub fn upsert(&mut self, record: DeploymentRecord) {
        match self
            .records
            .iter_mut()
            .find(|r| r.name.eq_ignore_ascii_case(&record.name))
        {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    /// Merge addresses printed by a custom deployment script into the table.
    ///
    /// Lines shaped like `Name: 0x<40 hex>` create or replace the record `name` (lowercased).
    /// Other lines holding an address are attributed to the first known contract name that
    /// appears in them. When `alias` is `(spec_name, main_contract)` and only the main contract
    /// was found, a copy of its record is added under the spec name. Returns the number of
    /// addresses picked up.
    pub fn import_script_output(
        &mut self,
        output: &str,
        deployer: Option<(Address, &str)>,
        alias: Option<(&str, &str)>,
    ) -> usize {
        let (deployer_address, deployer_key) = deployer.unwrap_or((Address::ZERO, ""));
        let record_for = |name: String, address: Address| DeploymentRecord {
            name,
            address,
            deployer_address,
            deployer_private_key: deployer_key.to_string(),
            txhash: None,
            abi_path: None,
            bindings_path: None,
        };

        let mut parsed = 0;
        for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(caps) = NAME_ADDRESS.captures(line) {
                if let Ok(address) = Address::from_str(&caps[2]) {
                    let name = caps[1].to_lowercase();
                    debug!(%name, %address, "parsed script output line");
                    self.upsert(record_for(name, address));
                    parsed += 1;
                }
                continue;
            }
            let Some(found) = ADDRESS.find(line) else {
                continue;
            };
            let Ok(address) = Address::from_str(found.as_str()) else {
                continue;
            };
            let lower = line.to_lowercase();
            let known = self
                .records
                .iter()
                .map(|r| r.name.to_lowercase())
                .find(|name| lower.contains(name.as_str()));
            if let Some(name) = known {
                debug!(%name, %address, "attributed address by name match");
                self.upsert(record_for(name, address));
                parsed += 1;
            }
        }

        if let Some((spec_name, main_contract)) = alias {
            self.add_alias(spec_name, main_contract);
        }
        parsed
    }

    /// Copy the record of `target` under the name `alias` unless `alias` already has one.
    pub fn add_alias(&mut self, alias: &str, target: &str) -> bool {
        if self.find(alias).is_some() {
            return false;
        }
        let Some(main) = self.find(target).cloned() else {
            return false;
        };
        info!(%alias, target = %main.name, address = %main.address, "adding alias record");
        self.records.push(DeploymentRecord {
            name: alias.to_lowercase(),
            ..main
        });
        true
    }
}

pub(crate) fn find_record<'a>(
    records: &'a [DeploymentRecord],
    name: &str,
) -> Option<&'a DeploymentRecord> {
    records
        .iter()
        .rev()
        .find(|r| r.name.eq_ignore_ascii_case(name))
}
