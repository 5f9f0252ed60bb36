pub mod abi;
pub mod accounts;
pub mod config;
pub mod deps;
pub mod error;
pub mod forge;
pub mod orchestrator;
pub mod records;
pub mod rpc;
pub mod template;

pub use abi::{Argument, decode_uint, encode_call, encode_with_signature, selector, signature};
pub use config::{ContractSpec, PostDeployment, PostDeploymentAction, SpecFile};
pub use deps::deployment_order;
pub use error::{Error, Result};
pub use forge::ForgeDeployer;
pub use orchestrator::{
    ContractCall, ContractCaller, DeployRequest, DeployedContract, Deployer, Orchestrator,
    RunOptions, RunReport,
};
pub use records::{DeploymentRecord, DeploymentTable};
pub use rpc::RpcCaller;
pub use template::{Environment, TemplateResolver};
