use std::str::FromStr;

use alloy::hex;
use alloy::primitives::Address;
use anyhow::{Context, Result, anyhow};
use clap::Subcommand;
use filwizard::{
    Argument, ContractCall, ContractCaller, DeploymentRecord, DeploymentTable, Environment,
    RpcCaller, TemplateResolver, decode_uint, encode_call, signature,
};
use tracing::info;

use crate::Config;
use crate::commands::deployer_key;

#[derive(Subcommand, Debug)]
pub enum CallCommand {
    /// Call a view method with eth_call
    Read {
        /// Deployment name or 0x address
        contract: String,
        method: String,
        args: Vec<String>,
    },
    /// Send a signed transaction calling a method
    Write {
        /// Deployment name or 0x address
        contract: String,
        method: String,
        args: Vec<String>,
        /// Signing key; defaults to the contract's deployer key
        #[arg(long)]
        key: Option<String>,
    },
}

pub fn encode(method: &str, raw_args: &[String]) -> Result<()> {
    let args: Vec<Argument> = raw_args.iter().map(|raw| Argument::infer(raw)).collect();
    println!("{}", signature(method, &args));
    println!("{}", hex::encode_prefixed(encode_call(method, &args)));
    Ok(())
}

pub async fn run(command: CallCommand, config: Config) -> Result<()> {
    let table = DeploymentTable::load(DeploymentTable::path_in(&config.workspace))?;
    let caller = RpcCaller::new(config.rpc_url.clone()).with_timeout(config.contract_timeout);

    match command {
        CallCommand::Read {
            contract,
            method,
            args,
        } => {
            let (to, _) = target(&table, &contract)?;
            let args = arguments(table.records(), &args)?;
            let calldata = encode_call(&method, &args);
            info!(%to, signature = %signature(&method, &args), "eth_call");
            let result = caller.read(to, calldata).await?;
            println!("{}", hex::encode_prefixed(&result));
            if !result.is_empty() {
                println!("as uint256: {}", decode_uint(&result)?);
            }
        }
        CallCommand::Write {
            contract,
            method,
            args,
            key,
        } => {
            let (to, record) = target(&table, &contract)?;
            let signing_key = match key.or_else(|| {
                record
                    .map(|r| r.deployer_private_key.clone())
                    .filter(|k| !k.is_empty())
            }) {
                Some(key) => key,
                None => deployer_key(None, &config)?,
            };
            let args = arguments(table.records(), &args)?;
            let call = ContractCall {
                to,
                method: method.clone(),
                calldata: encode_call(&method, &args),
                args,
                signing_key,
            };
            info!(%to, signature = %signature(&method, &call.args), "sending transaction");
            let tx_hash = caller.transact(&call).await?;
            println!("{tx_hash}");
        }
    }
    Ok(())
}

fn target<'a>(
    table: &'a DeploymentTable,
    contract: &str,
) -> Result<(Address, Option<&'a DeploymentRecord>)> {
    if let Some(record) = table.find(contract) {
        return Ok((record.address, Some(record)));
    }
    Address::from_str(contract)
        .map(|address| (address, None))
        .map_err(|_| anyhow!("{contract} is neither a recorded deployment nor an address"))
}

/// Expand placeholders, then infer each argument's type.
fn arguments(records: &[DeploymentRecord], raw: &[String]) -> Result<Vec<Argument>> {
    let env = Environment::from_process();
    let resolved = TemplateResolver::new(records, &env)
        .resolve_arguments(raw)
        .context("resolving call arguments")?;
    Ok(resolved.iter().map(|value| Argument::infer(value)).collect())
}
