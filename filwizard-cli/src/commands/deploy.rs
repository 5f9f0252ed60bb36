use std::path::{Path, PathBuf};
use std::str::FromStr;

use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result, bail};
use clap::Args;
use filwizard::{
    DeploymentTable, Environment, ForgeDeployer, Orchestrator, RpcCaller, RunOptions, SpecFile,
    deployment_order,
};
use tracing::{info, warn};

use crate::Config;
use crate::commands::deployer_key;

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Contracts spec file
    #[arg(long)]
    config: PathBuf,

    /// Private key used to deploy and to send post-deployment calls
    #[arg(long)]
    deployer_key: Option<String>,

    /// Import addresses printed by a custom deploy script instead of running forge
    #[arg(long)]
    import_output: Option<PathBuf>,

    /// Save each contract's ABI under <workspace>/contracts
    #[arg(long)]
    abi: bool,
}

pub async fn run(args: DeployArgs, config: Config) -> Result<()> {
    let spec = SpecFile::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let key = deployer_key(args.deployer_key, &config)?;

    if let Some(output) = args.import_output {
        return import(&spec, &output, &key, &config);
    }

    let deployer = ForgeDeployer::new(config.rpc_url.as_str(), &config.workspace)
        .with_timeout(config.contract_timeout)
        .with_abi_export(args.abi);
    let caller = RpcCaller::new(config.rpc_url.clone()).with_timeout(config.contract_timeout);
    let options = RunOptions {
        workspace: config.workspace.clone(),
        private_key: key,
        settle_delay: config.settle_delay,
    };
    info!(
        rpc = %config.rpc_url,
        workspace = %config.workspace.display(),
        contracts = spec.contracts.len(),
        "starting deployment"
    );

    let orchestrator = Orchestrator::new(deployer, caller, options);
    let mut env = Environment::from_process();
    let report = orchestrator.run(&spec, &mut env).await?;

    for record in &report.deployed {
        println!("{:<24} {}", record.name, record.address);
    }
    for issue in &report.warnings {
        warn!("{issue}");
    }
    for issue in &report.failures {
        println!("FAILED {issue}");
    }
    if !report.is_success() {
        bail!(
            "{} of {} contracts failed to deploy",
            report.failures.len(),
            report.order.len()
        );
    }
    Ok(())
}

/// Merge a script's printed addresses into the deployment table, aliasing each spec name to its
/// main contract when only the latter was printed.
fn import(spec: &SpecFile, output: &Path, key: &str, config: &Config) -> Result<()> {
    let text = std::fs::read_to_string(output)
        .with_context(|| format!("reading script output {}", output.display()))?;
    let deployer = PrivateKeySigner::from_str(key.trim())
        .context("invalid deployer private key")?
        .address();

    let mut table = DeploymentTable::load(DeploymentTable::path_in(&config.workspace))?;
    let parsed = table.import_script_output(&text, Some((deployer, key)), None);
    for contract in &spec.contracts {
        if !contract.main_contract.is_empty() {
            table.add_alias(&contract.name, &contract.main_contract);
        }
    }
    table.save()?;
    info!(parsed, path = %table.path().display(), "imported script output");
    Ok(())
}

pub fn order(config: &Path) -> Result<()> {
    let spec =
        SpecFile::load(config).with_context(|| format!("loading {}", config.display()))?;
    for (index, contract) in deployment_order(&spec.contracts)?.iter().enumerate() {
        if contract.dependencies.is_empty() {
            println!("{:>3}. {}", index + 1, contract.name);
        } else {
            println!(
                "{:>3}. {} (after {})",
                index + 1,
                contract.name,
                contract.dependencies.join(", ")
            );
        }
    }
    Ok(())
}
