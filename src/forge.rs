use std::path::{Path, PathBuf};
use std::process::Output;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, TxHash};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ContractSpec;
use crate::orchestrator::{DeployRequest, DeployedContract, Deployer};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Projects whose contracts live in this subdirectory are built from inside it.
const NESTED_PROJECT_DIR: &str = "service_contracts";

/// Deploys contracts with `forge create`, cloning git projects into the workspace on demand.
#[derive(Debug, Clone)]
pub struct ForgeDeployer {
    rpc_url: String,
    workspace: PathBuf,
    timeout: Duration,
    export_abi: bool,
    forge: PathBuf,
}

impl ForgeDeployer {
    pub fn new(rpc_url: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            workspace: workspace.into(),
            timeout: DEFAULT_TIMEOUT,
            export_abi: false,
            forge: PathBuf::from("forge"),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Write `<workspace>/contracts/<name>.abi.json` after each deployment.
    pub fn with_abi_export(mut self, export_abi: bool) -> Self {
        self.export_abi = export_abi;
        self
    }

    pub fn with_forge_binary(mut self, forge: impl Into<PathBuf>) -> Self {
        self.forge = forge.into();
        self
    }

    /// Directory of the project holding `spec`, cloning it first when it has a git origin.
    async fn project_dir(&self, spec: &ContractSpec) -> Result<PathBuf> {
        let dir = self.workspace.join(clone_dir_name(&spec.name));
        if dir.is_dir() {
            return Ok(dir);
        }
        let Some(url) = spec.git_url.as_deref().filter(|u| !u.is_empty()) else {
            return Ok(PathBuf::from("."));
        };

        tokio::fs::create_dir_all(&self.workspace)
            .await
            .with_context(|| format!("creating workspace {}", self.workspace.display()))?;
        let mut git = Command::new("git");
        git.arg("clone").arg("--recurse-submodules");
        if let Some(git_ref) = spec.git_ref.as_deref().filter(|r| !r.is_empty()) {
            git.args(["--branch", git_ref]);
        }
        git.arg(url).arg(&dir);
        info!(contract = %spec.name, %url, dir = %dir.display(), "cloning project");
        self.run(git, "git clone").await?;
        Ok(dir)
    }

    async fn run(&self, mut command: Command, what: &str) -> Result<Output> {
        command.kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| anyhow!("{what} timed out after {:?}", self.timeout))?
            .with_context(|| format!("failed to spawn {what}"))?;
        if !output.status.success() {
            bail!(
                "{what} exited with {}: {}{}",
                output.status,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(output)
    }

    async fn write_abi(&self, dir: &Path, target: &str, request: &DeployRequest) -> Result<PathBuf> {
        let mut inspect = Command::new(&self.forge);
        inspect
            .current_dir(dir)
            .envs(&request.env)
            .args(["inspect", target, "abi", "--json"]);
        let output = self.run(inspect, "forge inspect").await?;
        serde_json::from_slice::<serde_json::Value>(&output.stdout)
            .context("forge inspect did not print a JSON ABI")?;

        let contracts = self.workspace.join("contracts");
        tokio::fs::create_dir_all(&contracts).await?;
        let path = contracts.join(format!("{}.abi.json", request.spec.name.to_lowercase()));
        tokio::fs::write(&path, &output.stdout)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

#[async_trait]
impl Deployer for ForgeDeployer {
    async fn deploy(&self, request: &DeployRequest) -> Result<DeployedContract> {
        if request.private_key.is_empty() {
            bail!("no deployer key configured");
        }
        let signer = PrivateKeySigner::from_str(request.private_key.trim())
            .context("invalid deployer private key")?;

        let spec = &request.spec;
        let (dir, target) = build_location(&self.project_dir(spec).await?, spec);
        debug!(contract = %spec.name, dir = %dir.display(), %target, "running forge create");

        let mut create = Command::new(&self.forge);
        create
            .current_dir(&dir)
            .envs(&request.env)
            .args(["create", "--rpc-url", self.rpc_url.as_str()])
            .args(["--private-key", request.private_key.trim()])
            .args(["--broadcast", "--optimizer-runs", "200", "--via-ir"])
            .arg(&target);
        if !request.constructor_args.is_empty() {
            create.arg("--constructor-args").args(&request.constructor_args);
        }
        let output = self.run(create, "forge create").await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let (address, tx_hash) = parse_create_output(&stdout)?;

        let abi_path = if self.export_abi {
            match self.write_abi(&dir, &target, request).await {
                Ok(path) => Some(path),
                Err(error) => {
                    warn!(contract = %spec.name, error = %format!("{error:#}"), "ABI export failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(DeployedContract {
            address,
            deployer_address: signer.address(),
            tx_hash,
            abi_path,
            bindings_path: None,
        })
    }
}

/// Working directory and `path:Contract` target for `forge create`.
fn build_location(project: &Path, spec: &ContractSpec) -> (PathBuf, String) {
    let target = spec.target();
    if let Some(inner) = target.strip_prefix(&format!("{NESTED_PROJECT_DIR}/")) {
        let nested = project.join(NESTED_PROJECT_DIR);
        if nested.is_dir() {
            return (nested, inner.to_string());
        }
    }
    (project.to_path_buf(), target)
}

/// Workspace subdirectory a contract's project is cloned into: the name lowercased, spaces as `-`.
fn clone_dir_name(name: &str) -> String {
    name.to_lowercase().replace(' ', "-")
}

/// Pull the contract address and transaction hash out of `forge create` output.
pub fn parse_create_output(output: &str) -> Result<(Address, Option<TxHash>)> {
    let field = |label: &str| {
        output
            .lines()
            .find_map(|line| line.split_once(label).map(|(_, rest)| rest.trim()))
    };
    let address = field("Deployed to:")
        .ok_or_else(|| anyhow!("no `Deployed to:` line in forge output:\n{output}"))?;
    let address = Address::from_str(address)
        .with_context(|| format!("invalid deployed address `{address}`"))?;
    let tx_hash = field("Transaction hash:").and_then(|hash| TxHash::from_str(hash).ok());
    Ok((address, tx_hash))
}
