mod commands;

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use crate::commands::{call, deploy, deployments};

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:1234/rpc/v1";

pub struct Config {
    pub rpc_url: Url,
    pub workspace: PathBuf,
    pub contract_timeout: Duration,
    pub settle_delay: Duration,
    pub private_key: Option<String>,
}

impl Config {
    fn from_env() -> Result<Self> {
        let rpc_url = env::var("FILECOIN_RPC").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string());
        let workspace = env::var("WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./workspace"));
        Ok(Self {
            rpc_url: Url::parse(&rpc_url).context("FILECOIN_RPC must be a valid URL")?,
            workspace,
            contract_timeout: Duration::from_secs(secs_from_env("CONTRACT_TIMEOUT_SECS", 300)?),
            settle_delay: Duration::from_secs(secs_from_env("DEPLOY_SETTLE_SECS", 5)?),
            private_key: env::var("PRIVATE_KEY").ok().filter(|k| !k.is_empty()),
        })
    }
}

fn secs_from_env(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a number of seconds")),
        Err(_) => Ok(default),
    }
}

#[derive(Parser, Debug)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"), about, long_about = None)]
struct Cli {
    /// Workspace holding deployments.json and accounts.json
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy every contract of a spec file in dependency order
    Deploy(deploy::DeployArgs),
    /// Print the order contracts of a spec file would be deployed in
    Order {
        #[arg(long)]
        config: PathBuf,
    },
    /// List recorded deployments
    List,
    /// Show one deployment record
    Info {
        #[arg(long)]
        contract: String,
    },
    /// Print call data for a method, inferring argument types
    Encode { method: String, args: Vec<String> },
    /// Call a deployed contract
    #[command(subcommand)]
    Call(call::CallCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filwizard=info,filwizard_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(workspace) = cli.workspace {
        config.workspace = workspace;
    }

    match cli.command {
        Commands::Deploy(args) => deploy::run(args, config).await,
        Commands::Order { config: spec } => deploy::order(&spec),
        Commands::List => deployments::list(&config),
        Commands::Info { contract } => deployments::info(&config, &contract),
        Commands::Encode { method, args } => call::encode(&method, &args),
        Commands::Call(command) => call::run(command, config).await,
    }
}
