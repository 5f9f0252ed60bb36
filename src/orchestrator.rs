//! Drives a spec file through ordering, template resolution, deployment and post-deployment
//! calls. Chain access goes through the [`Deployer`] and [`ContractCaller`] traits.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::abi::{self, Argument};
use crate::accounts::AccountsFile;
use crate::config::{ContractSpec, PostDeploymentAction, SpecFile};
use crate::deps::deployment_order;
use crate::error::{Error, Result};
use crate::records::{DeploymentRecord, DeploymentTable, redact_key};
use crate::template::{Environment, TemplateResolver};

/// Export expression that stands for the address just deployed.
pub const SELF_EXPORT: &str = "self";

/// Everything a [`Deployer`] needs to put one contract on chain.
#[derive(Clone)]
pub struct DeployRequest {
    pub spec: ContractSpec,
    /// Constructor arguments with placeholders and generators already expanded.
    pub constructor_args: Vec<String>,
    /// The contract's own environment, resolved.
    pub env: BTreeMap<String, String>,
    pub private_key: String,
}

impl fmt::Debug for DeployRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployRequest")
            .field("contract", &self.spec.name)
            .field("constructor_args", &self.constructor_args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("private_key", &redact_key(&self.private_key))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedContract {
    pub address: Address,
    pub deployer_address: Address,
    pub tx_hash: Option<TxHash>,
    pub abi_path: Option<PathBuf>,
    pub bindings_path: Option<PathBuf>,
}

#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, request: &DeployRequest) -> anyhow::Result<DeployedContract>;
}

/// A signed state-changing call.
#[derive(Clone)]
pub struct ContractCall {
    pub to: Address,
    pub method: String,
    pub args: Vec<Argument>,
    pub calldata: Bytes,
    pub signing_key: String,
}

impl fmt::Debug for ContractCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractCall")
            .field("to", &self.to)
            .field("method", &self.method)
            .field("args", &self.args)
            .field("calldata", &self.calldata)
            .field("signing_key", &redact_key(&self.signing_key))
            .finish()
    }
}

#[async_trait]
pub trait ContractCaller: Send + Sync {
    async fn transact(&self, call: &ContractCall) -> anyhow::Result<TxHash>;
    async fn read(&self, to: Address, calldata: Bytes) -> anyhow::Result<Bytes>;
}

#[derive(Clone)]
pub struct RunOptions {
    pub workspace: PathBuf,
    pub private_key: String,
    /// Pause after each deployment so the next one sees settled state.
    pub settle_delay: Duration,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("workspace", &self.workspace)
            .field("private_key", &redact_key(&self.private_key))
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}

/// A problem attributed to one contract of the run.
#[derive(Debug)]
pub struct ContractIssue {
    pub contract: String,
    pub error: Error,
}

impl fmt::Display for ContractIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.contract, self.error)
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// Contract names in deployment order.
    pub order: Vec<String>,
    pub deployed: Vec<DeploymentRecord>,
    /// Contracts that were skipped because resolution or deployment failed.
    pub failures: Vec<ContractIssue>,
    /// Post-deployment and export problems; the affected records stay.
    pub warnings: Vec<ContractIssue>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Orchestrator<D, C> {
    deployer: D,
    caller: C,
    options: RunOptions,
}

impl<D: Deployer, C: ContractCaller> Orchestrator<D, C> {
    pub fn new(deployer: D, caller: C, options: RunOptions) -> Self {
        Self {
            deployer,
            caller,
            options,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Deploy every contract of `spec_file` in dependency order.
    ///
    /// Ordering errors abort before anything is deployed. A contract whose arguments cannot be
    /// resolved or whose deployment fails is skipped and the run continues; so is every contract
    /// declaring it as a dependency. Exports are written into `env` so later contracts (and the
    /// caller) can read them.
    pub async fn run(&self, spec_file: &SpecFile, env: &mut Environment) -> Result<RunReport> {
        let ordered = deployment_order(&spec_file.contracts)?;
        env.extend(spec_file.environment.clone());

        let mut report = RunReport {
            order: ordered.iter().map(|s| s.name.clone()).collect(),
            ..Default::default()
        };
        info!(order = ?report.order, "deployment order");

        for spec in ordered {
            let outcome = match unmet_dependency(spec, &report.deployed) {
                Some(dependency) => Err(Error::MissingDeploymentRecord(dependency.to_string())),
                None => self.deploy_contract(spec, env, &mut report.warnings).await,
            };
            match outcome {
                Ok(record) => {
                    report.deployed.push(record);
                    if !self.options.settle_delay.is_zero() {
                        debug!(delay = ?self.options.settle_delay, "waiting for deployment to settle");
                        tokio::time::sleep(self.options.settle_delay).await;
                    }
                }
                Err(error @ Error::RecordNotSaved { .. }) => {
                    error!(contract = %spec.name, %error, "contract is live but unrecorded");
                    report.failures.push(ContractIssue {
                        contract: spec.name.clone(),
                        error,
                    });
                }
                Err(error) => {
                    warn!(contract = %spec.name, %error, "skipping contract");
                    report.failures.push(ContractIssue {
                        contract: spec.name.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            deployed = report.deployed.len(),
            failed = report.failures.len(),
            warnings = report.warnings.len(),
            "deployment run finished"
        );
        Ok(report)
    }

    async fn deploy_contract(
        &self,
        spec: &ContractSpec,
        env: &mut Environment,
        warnings: &mut Vec<ContractIssue>,
    ) -> Result<DeploymentRecord> {
        let mut table = DeploymentTable::load(DeploymentTable::path_in(&self.options.workspace))?;

        let (contract_env, scoped) = resolve_contract_env(spec, table.records(), env)?;
        let constructor_args =
            TemplateResolver::new(table.records(), &scoped).resolve_arguments(&spec.constructor_args)?;
        debug!(contract = %spec.name, args = constructor_args.len(), "resolved constructor arguments");

        let request = DeployRequest {
            spec: spec.clone(),
            constructor_args,
            env: contract_env,
            private_key: self.options.private_key.clone(),
        };
        info!(contract = %spec.name, target = %spec.target(), "deploying");
        let deployed = self
            .deployer
            .deploy(&request)
            .await
            .map_err(|source| Error::DeployFailed {
                contract: spec.name.clone(),
                source,
            })?;

        let record = DeploymentRecord {
            name: spec.name.clone(),
            address: deployed.address,
            deployer_address: deployed.deployer_address,
            deployer_private_key: self.options.private_key.clone(),
            txhash: deployed.tx_hash,
            abi_path: deployed.abi_path,
            bindings_path: deployed.bindings_path,
        };
        table.append(record.clone());
        table.save().map_err(|source| Error::RecordNotSaved {
            contract: spec.name.clone(),
            address: record.address,
            source: Box::new(source),
        })?;
        info!(contract = %spec.name, address = %record.address, "deployed");

        if !self.options.private_key.is_empty() {
            let accounts = AccountsFile::path_in(&self.options.workspace);
            if let Err(error) =
                AccountsFile::record_deployer(&accounts, record.deployer_address, &self.options.private_key)
            {
                warn!(%error, "failed to record deployer account");
            }
        }

        if let Some(post) = &spec.post_deployment {
            for action in post.steps() {
                if let Err(source) = self
                    .run_action(record.address, action, table.records(), &scoped)
                    .await
                {
                    let error = Error::PostDeployActionFailed {
                        contract: spec.name.clone(),
                        method: action.method.clone(),
                        source,
                    };
                    warn!(%error, "stopping post-deployment actions");
                    warnings.push(ContractIssue {
                        contract: spec.name.clone(),
                        error,
                    });
                    break;
                }
            }
        }

        let resolver = TemplateResolver::new(table.records(), &scoped);
        for (name, expression) in &spec.exports {
            let value = if expression.trim().eq_ignore_ascii_case(SELF_EXPORT) {
                Ok(record.address.to_string())
            } else {
                resolver.resolve(expression)
            };
            match value {
                Ok(value) => {
                    info!(contract = %spec.name, export = %name, "exported");
                    env.set(name.clone(), value);
                }
                Err(error) => {
                    warn!(contract = %spec.name, export = %name, %error, "export failed");
                    warnings.push(ContractIssue {
                        contract: spec.name.clone(),
                        error,
                    });
                }
            }
        }

        Ok(record)
    }

    async fn run_action(
        &self,
        to: Address,
        action: &PostDeploymentAction,
        records: &[DeploymentRecord],
        env: &Environment,
    ) -> anyhow::Result<TxHash> {
        let values = TemplateResolver::new(records, env).resolve_arguments(&action.args)?;
        let args = abi::parse_arguments(&values, &action.types)?;
        let calldata = abi::encode_call(&action.method, &args);
        debug!(
            method = %abi::signature(&action.method, &args),
            description = action.description.as_deref().unwrap_or_default(),
            "post-deployment call"
        );
        let call = ContractCall {
            to,
            method: action.method.clone(),
            args,
            calldata,
            signing_key: self.options.private_key.clone(),
        };
        let tx_hash = self.caller.transact(&call).await?;
        info!(method = %action.method, %tx_hash, "post-deployment call confirmed");
        Ok(tx_hash)
    }
}

/// First declared dependency that was not deployed earlier in this run.
fn unmet_dependency<'s>(spec: &'s ContractSpec, deployed: &[DeploymentRecord]) -> Option<&'s str> {
    spec.dependencies
        .iter()
        .map(String::as_str)
        .find(|dependency| !deployed.iter().any(|record| record.name == *dependency))
}

/// Resolve a contract's own environment against the run environment, and return it along with
/// the run environment overlaid by it.
fn resolve_contract_env(
    spec: &ContractSpec,
    records: &[DeploymentRecord],
    env: &Environment,
) -> Result<(BTreeMap<String, String>, Environment)> {
    let resolver = TemplateResolver::new(records, env);
    let resolved = spec
        .environment
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolver.resolve(value)?)))
        .collect::<Result<BTreeMap<_, _>>>()?;
    let mut scoped = env.clone();
    scoped.extend(resolved.clone());
    Ok((resolved, scoped))
}
