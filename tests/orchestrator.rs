use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, address};
use anyhow::{Result, bail};
use async_trait::async_trait;
use filwizard::accounts::AccountsFile;
use filwizard::{
    Argument, ContractCall, ContractCaller, ContractSpec, DeployRequest, DeployedContract,
    Deployer, DeploymentRecord, DeploymentTable, Environment, Error, Orchestrator, PostDeployment,
    PostDeploymentAction, RunOptions, SpecFile, encode_call,
};

const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const DEPLOYER: Address = address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

#[derive(Default)]
struct MockDeployer {
    failing: HashSet<String>,
    requests: Mutex<Vec<DeployRequest>>,
}

impl MockDeployer {
    fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<DeployRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl<'a> Deployer for &'a MockDeployer {
    async fn deploy(&self, request: &DeployRequest) -> Result<DeployedContract> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        if self.failing.contains(&request.spec.name) {
            bail!("forge create exited with 1");
        }
        Ok(DeployedContract {
            address: Address::with_last_byte(requests.len() as u8),
            deployer_address: DEPLOYER,
            tx_hash: Some(TxHash::with_last_byte(requests.len() as u8)),
            abi_path: None,
            bindings_path: None,
        })
    }
}

#[derive(Default)]
struct MockCaller {
    failing: HashSet<String>,
    calls: Mutex<Vec<ContractCall>>,
}

impl MockCaller {
    fn failing(methods: &[&str]) -> Self {
        Self {
            failing: methods.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<ContractCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl<'a> ContractCaller for &'a MockCaller {
    async fn transact(&self, call: &ContractCall) -> Result<TxHash> {
        self.calls.lock().unwrap().push(call.clone());
        if self.failing.contains(&call.method) {
            bail!("execution reverted");
        }
        Ok(TxHash::with_last_byte(0xaa))
    }

    async fn read(&self, _to: Address, _calldata: Bytes) -> Result<Bytes> {
        Ok(Bytes::new())
    }
}

fn options(workspace: &Path) -> RunOptions {
    RunOptions {
        workspace: workspace.to_path_buf(),
        private_key: KEY.to_string(),
        settle_delay: Duration::ZERO,
    }
}

fn contract(name: &str, deps: &[&str], args: &[&str]) -> ContractSpec {
    ContractSpec {
        name: name.to_string(),
        main_contract: name.to_string(),
        contract_path: format!("src/{name}.sol"),
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        constructor_args: args.iter().map(|a| a.to_string()).collect(),
        ..Default::default()
    }
}

fn action(method: &str, args: &[&str], types: &[&str]) -> PostDeploymentAction {
    PostDeploymentAction {
        method: method.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        types: types.iter().map(|t| t.to_string()).collect(),
        description: None,
    }
}

fn spec_file(contracts: Vec<ContractSpec>) -> SpecFile {
    SpecFile {
        contracts,
        ..Default::default()
    }
}

#[tokio::test]
async fn dependent_receives_dependency_address() {
    let workspace = tempfile::tempdir().unwrap();
    let deployer = MockDeployer::default();
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    let spec = spec_file(vec![
        contract("B", &["A"], &["{address:A}", "42"]),
        contract("A", &[], &[]),
    ]);
    let report = orchestrator
        .run(&spec, &mut Environment::isolated())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.order, vec!["A", "B"]);
    let requests = deployer.requests();
    assert_eq!(
        requests[1].constructor_args,
        vec![Address::with_last_byte(1).to_string(), "42".to_string()]
    );

    let table = DeploymentTable::load(DeploymentTable::path_in(workspace.path())).unwrap();
    let names: Vec<_> = table.records().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
    assert_eq!(table.find("b").unwrap().address, Address::with_last_byte(2));
    assert_eq!(table.find("a").unwrap().deployer_private_key, KEY);
}

#[tokio::test]
async fn cycle_aborts_before_any_deployment() {
    let workspace = tempfile::tempdir().unwrap();
    let deployer = MockDeployer::default();
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    let spec = spec_file(vec![contract("A", &["B"], &[]), contract("B", &["A"], &[])]);
    let err = orchestrator
        .run(&spec, &mut Environment::isolated())
        .await
        .unwrap_err();

    match err {
        Error::CyclicOrMissingDependency(blocked) => assert_eq!(blocked, vec!["A", "B"]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(deployer.requests().is_empty());
}

#[tokio::test]
async fn self_export_is_visible_to_later_contracts() {
    let workspace = tempfile::tempdir().unwrap();
    let deployer = MockDeployer::default();
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    let mut c = contract("C", &[], &[]);
    c.exports.insert("C_ADDR".into(), "self".into());
    c.exports.insert("C_DEPLOYER".into(), "{deployment:C:deployer_address}".into());
    let d = contract("D", &["C"], &["{env:C_ADDR}"]);

    let mut env = Environment::isolated();
    let report = orchestrator.run(&spec_file(vec![c, d]), &mut env).await.unwrap();

    assert!(report.is_success());
    assert!(report.warnings.is_empty());
    let c_address = Address::with_last_byte(1).to_string();
    assert_eq!(env.get("C_ADDR"), Some(c_address.clone()));
    assert_eq!(env.get("C_DEPLOYER"), Some(DEPLOYER.to_string()));
    assert_eq!(deployer.requests()[1].constructor_args, vec![c_address]);
}

#[tokio::test]
async fn failed_deployment_skips_dependents_but_not_others() {
    let workspace = tempfile::tempdir().unwrap();
    let deployer = MockDeployer::failing(&["A"]);
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    let spec = spec_file(vec![
        contract("A", &[], &[]),
        contract("B", &["A"], &["{address:A}"]),
        contract("C", &[], &[]),
    ]);
    let report = orchestrator
        .run(&spec, &mut Environment::isolated())
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 2);
    assert!(matches!(report.failures[0].error, Error::DeployFailed { ref contract, .. } if contract == "A"));
    assert_eq!(report.failures[1].contract, "B");
    assert!(matches!(report.failures[1].error, Error::MissingDeploymentRecord(ref name) if name == "A"));
    assert_eq!(report.deployed.len(), 1);
    assert_eq!(report.deployed[0].name, "C");

    // B never reached the deployer.
    let attempted: Vec<_> = deployer.requests().into_iter().map(|r| r.spec.name).collect();
    assert_eq!(attempted, vec!["A", "C"]);
}

#[tokio::test]
async fn failing_action_stops_remaining_actions_and_keeps_record() {
    let workspace = tempfile::tempdir().unwrap();
    let deployer = MockDeployer::default();
    let caller = MockCaller::failing(&["setOperator"]);
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    let mut token = contract("Token", &[], &[]);
    token.post_deployment = Some(PostDeployment {
        initialize: Some(action("initialize", &[], &[])),
        actions: vec![
            action("setOperator", &["{address:Token}", "true"], &["address", "bool"]),
            action("mint", &["{address:Token}", "1000"], &["address", "uint256"]),
        ],
    });
    let report = orchestrator
        .run(&spec_file(vec![token]), &mut Environment::isolated())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.deployed.len(), 1);
    assert_eq!(report.warnings.len(), 1);
    assert!(matches!(
        report.warnings[0].error,
        Error::PostDeployActionFailed { ref method, .. } if method == "setOperator"
    ));

    let methods: Vec<_> = caller.calls().into_iter().map(|c| c.method).collect();
    assert_eq!(methods, vec!["initialize", "setOperator"]);

    let table = DeploymentTable::load(DeploymentTable::path_in(workspace.path())).unwrap();
    assert!(table.find("Token").is_some());
}

#[tokio::test]
async fn action_calls_carry_encoded_calldata() {
    let workspace = tempfile::tempdir().unwrap();
    let deployer = MockDeployer::default();
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    let mut vault = contract("Vault", &[], &[]);
    vault.post_deployment = Some(PostDeployment {
        initialize: None,
        actions: vec![action("setLimit", &["0x10", "label"], &["uint256", "string"])],
    });
    orchestrator
        .run(&spec_file(vec![vault]), &mut Environment::isolated())
        .await
        .unwrap();

    let calls = caller.calls();
    assert_eq!(calls.len(), 1);
    let expected_args = vec![
        Argument::parse("16", "uint256").unwrap(),
        Argument::String("label".into()),
    ];
    assert_eq!(calls[0].to, Address::with_last_byte(1));
    assert_eq!(calls[0].args, expected_args);
    assert_eq!(calls[0].calldata, encode_call("setLimit", &expected_args));
    assert_eq!(calls[0].signing_key, KEY);
}

#[tokio::test]
async fn mismatched_action_types_are_a_warning() {
    let workspace = tempfile::tempdir().unwrap();
    let deployer = MockDeployer::default();
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    let mut vault = contract("Vault", &[], &[]);
    vault.post_deployment = Some(PostDeployment {
        initialize: None,
        actions: vec![action("setLimit", &["1", "2"], &["uint256"])],
    });
    let report = orchestrator
        .run(&spec_file(vec![vault]), &mut Environment::isolated())
        .await
        .unwrap();

    assert_eq!(report.deployed.len(), 1);
    assert_eq!(report.warnings.len(), 1);
    assert!(caller.calls().is_empty());
}

#[tokio::test]
async fn contract_environment_resolves_and_reaches_the_deployer() {
    let workspace = tempfile::tempdir().unwrap();
    let deployer = MockDeployer::default();
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    let token = contract("Token", &[], &[]);
    let mut payments = contract("Payments", &["Token"], &["{env:PAYMENT_TOKEN}", "{env:FINALITY}"]);
    payments
        .environment
        .insert("PAYMENT_TOKEN".into(), "{address:Token}".into());
    let mut spec = spec_file(vec![token, payments]);
    spec.environment.insert("FINALITY".into(), "10".into());

    let report = orchestrator
        .run(&spec, &mut Environment::isolated())
        .await
        .unwrap();
    assert!(report.is_success());

    let token_address = Address::with_last_byte(1).to_string();
    let request = &deployer.requests()[1];
    assert_eq!(request.env["PAYMENT_TOKEN"], token_address);
    assert_eq!(request.constructor_args, vec![token_address, "10".to_string()]);
}

#[tokio::test]
async fn generator_arguments_are_encoded_before_deploying() {
    let workspace = tempfile::tempdir().unwrap();
    let deployer = MockDeployer::default();
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    let implementation = contract("PaymentsImpl", &[], &[]);
    let proxy = contract(
        "PaymentsProxy",
        &["PaymentsImpl"],
        &["{address:PaymentsImpl}", "CAST_CALLDATA:initialize()"],
    );
    orchestrator
        .run(&spec_file(vec![implementation, proxy]), &mut Environment::isolated())
        .await
        .unwrap();

    let args = &deployer.requests()[1].constructor_args;
    assert_eq!(args[1], "0x8129fc1c");
}

#[tokio::test]
async fn first_deployment_records_deployer_account() {
    let workspace = tempfile::tempdir().unwrap();
    let deployer = MockDeployer::default();
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    orchestrator
        .run(&spec_file(vec![contract("A", &[], &[])]), &mut Environment::isolated())
        .await
        .unwrap();

    let accounts = AccountsFile::load(&AccountsFile::path_in(workspace.path())).unwrap();
    assert_eq!(accounts.deployer_key(), Some(KEY));
}

#[tokio::test]
async fn dependent_of_failed_contract_is_skipped_without_placeholders() {
    let workspace = tempfile::tempdir().unwrap();
    // A record left over from an earlier run must not satisfy this run's dependency.
    let mut table = DeploymentTable::load(DeploymentTable::path_in(workspace.path())).unwrap();
    table.append(DeploymentRecord {
        name: "A".into(),
        address: Address::with_last_byte(0x99),
        deployer_address: DEPLOYER,
        deployer_private_key: KEY.into(),
        txhash: None,
        abi_path: None,
        bindings_path: None,
    });
    table.save().unwrap();

    let deployer = MockDeployer::failing(&["A"]);
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    let spec = spec_file(vec![
        contract("A", &[], &[]),
        contract("B", &["A"], &[]),
        contract("C", &["A"], &["{address:A}"]),
    ]);
    let report = orchestrator
        .run(&spec, &mut Environment::isolated())
        .await
        .unwrap();

    assert!(report.deployed.is_empty());
    let failed: Vec<_> = report.failures.iter().map(|f| f.contract.as_str()).collect();
    assert_eq!(failed, vec!["A", "B", "C"]);
    for failure in &report.failures[1..] {
        assert!(matches!(failure.error, Error::MissingDeploymentRecord(ref name) if name == "A"));
    }
    let attempted: Vec<_> = deployer.requests().into_iter().map(|r| r.spec.name).collect();
    assert_eq!(attempted, vec!["A"]);
}

#[tokio::test]
async fn unresolved_contract_environment_fails_the_contract() {
    let workspace = tempfile::tempdir().unwrap();
    let deployer = MockDeployer::default();
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    let mut payments = contract("Payments", &[], &[]);
    payments
        .environment
        .insert("OPERATOR".into(), "{env:OPERATOR_ADDRESS}".into());
    let spec = spec_file(vec![payments, contract("Token", &[], &[])]);
    let report = orchestrator
        .run(&spec, &mut Environment::isolated())
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].contract, "Payments");
    assert!(matches!(report.failures[0].error, Error::UnresolvedPlaceholder(ref input) if input == "{env:OPERATOR_ADDRESS}"));
    let attempted: Vec<_> = deployer.requests().into_iter().map(|r| r.spec.name).collect();
    assert_eq!(attempted, vec!["Token"]);
}

#[tokio::test]
async fn failing_export_is_a_warning_and_keeps_the_record() {
    let workspace = tempfile::tempdir().unwrap();
    let deployer = MockDeployer::default();
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    let mut token = contract("Token", &[], &[]);
    token.exports.insert("REGISTRY".into(), "{address:Registry}".into());
    token.exports.insert("TOKEN".into(), "self".into());
    let mut env = Environment::isolated();
    let report = orchestrator
        .run(&spec_file(vec![token]), &mut env)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.deployed.len(), 1);
    assert_eq!(report.warnings.len(), 1);
    assert!(matches!(report.warnings[0].error, Error::MissingDeploymentRecord(ref name) if name == "Registry"));
    assert!(env.get("REGISTRY").is_none());
    assert_eq!(env.get("TOKEN"), Some(Address::with_last_byte(1).to_string()));

    let table = DeploymentTable::load(DeploymentTable::path_in(workspace.path())).unwrap();
    assert!(table.find("Token").is_some());
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn resolved_keys_stay_out_of_the_logs() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let workspace = tempfile::tempdir().unwrap();
    let deployer = MockDeployer::default();
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(&deployer, &caller, options(workspace.path()));

    let mut signer = contract("Signer", &[], &[]);
    signer
        .exports
        .insert("SIGNER_KEY".into(), "{deployment:Signer:deployer_private_key}".into());
    let relay = contract("Relay", &["Signer"], &["{env:SIGNER_KEY}"]);
    let mut env = Environment::isolated();
    let report = orchestrator
        .run(&spec_file(vec![signer, relay]), &mut env)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(env.get("SIGNER_KEY").as_deref(), Some(KEY));
    assert_eq!(deployer.requests()[1].constructor_args, vec![KEY.to_string()]);

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("exported"), "{output}");
    assert!(!output.contains(KEY.trim_start_matches("0x")), "{output}");
}

/// Deploys fine, then leaves a directory where the deployment table should be written.
struct UnrecordableDeployer {
    workspace: PathBuf,
}

#[async_trait]
impl Deployer for UnrecordableDeployer {
    async fn deploy(&self, _request: &DeployRequest) -> Result<DeployedContract> {
        std::fs::create_dir_all(DeploymentTable::path_in(&self.workspace))?;
        Ok(DeployedContract {
            address: Address::with_last_byte(7),
            deployer_address: DEPLOYER,
            tx_hash: None,
            abi_path: None,
            bindings_path: None,
        })
    }
}

#[tokio::test]
async fn unsaved_record_reports_the_live_address() {
    let workspace = tempfile::tempdir().unwrap();
    let deployer = UnrecordableDeployer {
        workspace: workspace.path().to_path_buf(),
    };
    let caller = MockCaller::default();
    let orchestrator = Orchestrator::new(deployer, &caller, options(workspace.path()));

    let report = orchestrator
        .run(&spec_file(vec![contract("Vault", &[], &[])]), &mut Environment::isolated())
        .await
        .unwrap();

    assert!(report.deployed.is_empty());
    assert_eq!(report.failures.len(), 1);
    let error = &report.failures[0].error;
    assert!(matches!(error, Error::RecordNotSaved { address, .. } if *address == Address::with_last_byte(7)));
    assert!(error.to_string().contains(&Address::with_last_byte(7).to_string()));
}
