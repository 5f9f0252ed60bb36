use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The contracts spec file: `{ "environment": {..}, "contracts": [..] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecFile {
    /// Values published to every contract before the run starts.
    #[serde(default, alias = "env", skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    pub contracts: Vec<ContractSpec>,
}

impl SpecFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub main_contract: String,
    #[serde(default)]
    pub contract_path: String,
    #[serde(default)]
    pub constructor_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_deployment: Option<PostDeployment>,
    /// Values made visible while this contract's templates resolve; they may hold placeholders.
    #[serde(default, alias = "env", skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Env name to address expression; `"self"` is the address just deployed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exports: BTreeMap<String, String>,
}

impl ContractSpec {
    /// `path:Contract` target understood by `forge create`.
    pub fn target(&self) -> String {
        if self.main_contract.is_empty() || self.contract_path.contains(':') {
            self.contract_path.clone()
        } else {
            format!("{}:{}", self.contract_path, self.main_contract)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDeployment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize: Option<PostDeploymentAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<PostDeploymentAction>,
}

impl PostDeployment {
    /// `initialize` first, then `actions` in declaration order.
    pub fn steps(&self) -> impl Iterator<Item = &PostDeploymentAction> {
        self.initialize.iter().chain(self.actions.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDeploymentAction {
    pub method: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
