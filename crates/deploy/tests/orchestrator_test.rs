//! Orchestrator tests against in-memory chain and explorer fakes.
//!
//! Run with: cargo test --test orchestrator_test

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_core::primitives::{Address, TxHash};
use anyhow::Result;
use chainship_deploy::{
    ChainClient, CompilerProfiles, ConstructorArg, DeployError, DeploymentPlan, DeploymentRequest,
    DeploymentStep, ExplorerVerifier, NetworkProfile, NetworkRegistry, Orchestrator,
    OrchestratorSettings, ReceiptStatus, ResolvedConfig, SubmittedDeployment,
    VerificationOutcome, VerificationRequest,
};
use tokio::sync::watch;

const DEPLOYER: Address = Address::repeat_byte(0xd0);

fn tx_hash_for(nonce: u64) -> TxHash {
    TxHash::left_padding_from(&(nonce + 1).to_be_bytes())
}

fn nonce_of(tx_hash: TxHash) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&tx_hash[24..]);
    u64::from_be_bytes(bytes) - 1
}

/// Chain fake: each receipt poll adds one confirmation.
#[derive(Clone, Default)]
struct FakeChain {
    state: Arc<Mutex<ChainState>>,
}

#[derive(Default)]
struct ChainState {
    submissions: Vec<DeploymentRequest>,
    polls: HashMap<TxHash, u64>,
    fail_contracts: Vec<String>,
    revert_contracts: Vec<String>,
    reverted: Vec<TxHash>,
    never_mined: bool,
}

impl FakeChain {
    fn failing_on(contract: &str) -> Self {
        let chain = Self::default();
        chain.state.lock().unwrap().fail_contracts.push(contract.to_string());
        chain
    }

    fn reverting_on(contract: &str) -> Self {
        let chain = Self::default();
        chain.state.lock().unwrap().revert_contracts.push(contract.to_string());
        chain
    }

    fn never_mined() -> Self {
        let chain = Self::default();
        chain.state.lock().unwrap().never_mined = true;
        chain
    }

    fn submissions(&self) -> Vec<DeploymentRequest> {
        self.state.lock().unwrap().submissions.clone()
    }
}

impl ChainClient for FakeChain {
    fn deployer_address(&self) -> Address {
        DEPLOYER
    }

    async fn submit_deployment(&self, request: &DeploymentRequest) -> Result<SubmittedDeployment> {
        let mut state = self.state.lock().unwrap();
        if state.fail_contracts.contains(&request.contract.name) {
            anyhow::bail!("insufficient funds for gas * price + value");
        }

        let nonce = state.submissions.len() as u64;
        state.submissions.push(request.clone());

        let tx_hash = tx_hash_for(nonce);
        if state.revert_contracts.contains(&request.contract.name) {
            state.reverted.push(tx_hash);
        }

        Ok(SubmittedDeployment {
            tx_hash,
            expected_address: DEPLOYER.create(nonce),
        })
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<ReceiptStatus>> {
        let mut state = self.state.lock().unwrap();
        if state.never_mined {
            return Ok(None);
        }

        let success = !state.reverted.contains(&tx_hash);
        let polls = state.polls.entry(tx_hash).or_default();
        *polls += 1;

        let nonce = nonce_of(tx_hash);
        Ok(Some(ReceiptStatus {
            success,
            contract_address: Some(DEPLOYER.create(nonce)),
            block_number: 100 + nonce,
            confirmations: *polls,
        }))
    }
}

/// Explorer fake: records requests, optionally fails every verification.
#[derive(Clone, Default)]
struct FakeExplorer {
    requests: Arc<Mutex<Vec<VerificationRequest>>>,
    fail: bool,
}

impl ExplorerVerifier for FakeExplorer {
    async fn verify(&self, request: &VerificationRequest) -> Result<VerificationOutcome> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            anyhow::bail!("Fail - Unable to verify");
        }
        Ok(VerificationOutcome::Verified)
    }
}

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        poll_interval: Duration::from_millis(5),
        confirmation_timeout: Duration::from_secs(5),
    }
}

fn bsc() -> NetworkProfile {
    let registry = NetworkRegistry::default();
    let keys = registry.required_keys("bsc").unwrap();
    let env: BTreeMap<String, String> = BTreeMap::from([
        (
            "PRIVATE_KEY".to_string(),
            "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string(),
        ),
        (
            "BNB_PRIVATE_RPC".to_string(),
            "https://bsc.example.org".to_string(),
        ),
        ("BSCSCAN_API_KEY".to_string(), "KEY".to_string()),
    ]);
    let config = ResolvedConfig::resolve(&keys, &env).unwrap();
    registry.resolve("bsc", &config).unwrap()
}

fn orchestrator(chain: &FakeChain, explorer: &FakeExplorer) -> Orchestrator<FakeChain, FakeExplorer> {
    Orchestrator::new(
        chain.clone(),
        explorer.clone(),
        CompilerProfiles::default(),
        settings(),
    )
}

#[tokio::test]
async fn test_dependent_steps_receive_prior_address() {
    let chain = FakeChain::default();
    let explorer = FakeExplorer::default();

    let results = orchestrator(&chain, &explorer)
        .run(&bsc(), &DeploymentPlan::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].contract.name, "AMMInfoBSC");
    assert_eq!(results[1].contract.name, "BSCPriceGetter");
    assert_eq!(results[0].address, DEPLOYER.create(0));
    assert_eq!(results[1].address, DEPLOYER.create(1));

    // The price getter is constructed with the AMM info address, verbatim.
    assert_eq!(results[1].constructor_args, vec![results[0].address.to_string()]);

    let submissions = chain.submissions();
    assert_eq!(submissions.len(), 2);
    assert!(submissions[0].constructor_args.is_empty());
    assert_eq!(
        submissions[1].constructor_args,
        vec![results[0].address.to_string()]
    );

    assert!(results.iter().all(|r| r.verification == Some(VerificationOutcome::Verified)));
    assert!(results.iter().all(|r| r.warnings.is_empty()));
}

#[tokio::test]
async fn test_first_step_failure_stops_the_run() {
    let chain = FakeChain::failing_on("AMMInfoBSC");
    let explorer = FakeExplorer::default();

    let failure = orchestrator(&chain, &explorer)
        .run(&bsc(), &DeploymentPlan::default())
        .await
        .unwrap_err();

    assert!(failure.completed.is_empty());
    assert!(matches!(
        failure.error,
        DeployError::SubmissionFailure { ref step, .. } if step == "amm_info"
    ));
    assert!(chain.submissions().is_empty());
    assert!(explorer.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_second_step_failure_keeps_first_result() {
    let chain = FakeChain::failing_on("BSCPriceGetter");
    let explorer = FakeExplorer::default();

    let failure = orchestrator(&chain, &explorer)
        .run(&bsc(), &DeploymentPlan::default())
        .await
        .unwrap_err();

    assert_eq!(failure.completed.len(), 1);
    assert_eq!(failure.completed[0].step_id, "amm_info");
    assert!(matches!(
        failure.error,
        DeployError::SubmissionFailure { ref step, .. } if step == "price_getter"
    ));
}

#[tokio::test]
async fn test_reverted_deployment_is_a_submission_failure() {
    let chain = FakeChain::reverting_on("AMMInfoBSC");
    let explorer = FakeExplorer::default();

    let failure = orchestrator(&chain, &explorer)
        .run(&bsc(), &DeploymentPlan::default())
        .await
        .unwrap_err();

    assert!(failure.completed.is_empty());
    assert!(matches!(failure.error, DeployError::SubmissionFailure { .. }));
    assert_eq!(chain.submissions().len(), 1);
}

#[tokio::test]
async fn test_verification_failure_is_a_warning() {
    let chain = FakeChain::default();
    let explorer = FakeExplorer {
        fail: true,
        ..Default::default()
    };

    let results = orchestrator(&chain, &explorer)
        .run(&bsc(), &DeploymentPlan::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    for result in &results {
        assert_ne!(result.address, Address::ZERO);
        assert!(result.confirmation.confirmations >= 1);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("Unable to verify"));
        assert!(matches!(
            result.verification,
            Some(VerificationOutcome::Failed { .. })
        ));
    }
}

#[tokio::test]
async fn test_waits_for_required_confirmations() {
    let chain = FakeChain::default();
    let explorer = FakeExplorer::default();
    let plan = DeploymentPlan::default().with_confirmations(3);

    let results = orchestrator(&chain, &explorer)
        .run(&bsc(), &plan)
        .await
        .unwrap();

    assert!(results.iter().all(|r| r.confirmation.confirmations >= 3));
}

#[tokio::test]
async fn test_unconfirmed_deployment_times_out() {
    let chain = FakeChain::never_mined();
    let explorer = FakeExplorer::default();
    let orchestrator = Orchestrator::new(
        chain.clone(),
        explorer,
        CompilerProfiles::default(),
        OrchestratorSettings {
            poll_interval: Duration::from_millis(5),
            confirmation_timeout: Duration::from_millis(50),
        },
    );

    let failure = orchestrator
        .run(&bsc(), &DeploymentPlan::default())
        .await
        .unwrap_err();

    assert!(failure.completed.is_empty());
    match failure.error {
        DeployError::DeploymentTimeout {
            step,
            tx_hash,
            expected_address,
            ..
        } => {
            assert_eq!(step, "amm_info");
            assert_eq!(tx_hash, tx_hash_for(0));
            assert_eq!(expected_address, DEPLOYER.create(0));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(chain.submissions().len(), 1);
}

#[tokio::test]
async fn test_cancel_before_first_step() {
    let chain = FakeChain::default();
    let explorer = FakeExplorer::default();
    let (tx, rx) = watch::channel(true);

    let failure = orchestrator(&chain, &explorer)
        .with_cancellation(rx)
        .run(&bsc(), &DeploymentPlan::default())
        .await
        .unwrap_err();
    drop(tx);

    assert!(matches!(
        failure.error,
        DeployError::Cancelled { ref step, tx_hash: None } if step == "amm_info"
    ));
    assert!(chain.submissions().is_empty());
}

#[tokio::test]
async fn test_cancel_while_waiting_keeps_sent_transaction() {
    let chain = FakeChain::never_mined();
    let explorer = FakeExplorer::default();
    let (tx, rx) = watch::channel(false);

    let orchestrator = orchestrator(&chain, &explorer).with_cancellation(rx);
    let network = bsc();
    let plan = DeploymentPlan::default();

    let (result, _) = tokio::join!(orchestrator.run(&network, &plan), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
    });

    let failure = result.unwrap_err();
    assert!(failure.completed.is_empty());
    assert!(matches!(
        failure.error,
        DeployError::Cancelled { tx_hash: Some(_), .. }
    ));
    assert_eq!(chain.submissions().len(), 1);
}

#[tokio::test]
async fn test_override_profile_is_used_for_its_source() {
    let chain = FakeChain::default();
    let explorer = FakeExplorer::default();
    let plan = DeploymentPlan::new().step(DeploymentStep::new(
        "healer",
        "contracts/VaultHealer.sol:VaultHealer",
    ));

    let profiles = CompilerProfiles::default();
    let default_runs = profiles.default.optimizer.runs;

    orchestrator(&chain, &explorer)
        .run(&bsc(), &plan)
        .await
        .unwrap();

    let submissions = chain.submissions();
    assert_eq!(submissions[0].compiler.optimizer.runs, 1);
    assert_ne!(submissions[0].compiler.optimizer.runs, default_runs);

    let requests = explorer.requests.lock().unwrap();
    assert_eq!(requests[0].compiler.optimizer.runs, 1);
}

#[tokio::test]
async fn test_literal_arguments_and_skipped_verification() {
    let chain = FakeChain::default();
    let explorer = FakeExplorer::default();
    let plan = DeploymentPlan::new()
        .step(DeploymentStep::new("info", "AmmInfo").verify(false))
        .step(
            DeploymentStep::new("getter", "PriceGetter")
                .arg(ConstructorArg::address_of("info"))
                .arg(ConstructorArg::literal("42")),
        );

    let results = orchestrator(&chain, &explorer)
        .run(&bsc(), &plan)
        .await
        .unwrap();

    assert_eq!(results[0].verification, None);
    assert_eq!(
        results[1].constructor_args,
        vec![results[0].address.to_string(), "42".to_string()]
    );
    assert_eq!(explorer.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_network_without_explorer_skips_verification() {
    let chain = FakeChain::default();
    let orchestrator = Orchestrator::new(
        chain,
        None::<FakeExplorer>,
        CompilerProfiles::default(),
        settings(),
    );

    let results = orchestrator
        .run(&bsc(), &DeploymentPlan::default())
        .await
        .unwrap();

    assert!(results.iter().all(|r| matches!(
        r.verification,
        Some(VerificationOutcome::Skipped { .. })
    )));
    assert!(results.iter().all(|r| r.warnings.is_empty()));
}

#[tokio::test]
async fn test_invalid_plan_sends_nothing() {
    let chain = FakeChain::default();
    let explorer = FakeExplorer::default();
    let plan = DeploymentPlan::new()
        .step(DeploymentStep::new("getter", "PriceGetter").arg(ConstructorArg::address_of("info")));

    let failure = orchestrator(&chain, &explorer)
        .run(&bsc(), &plan)
        .await
        .unwrap_err();

    assert!(matches!(failure.error, DeployError::UnresolvedDependency { .. }));
    assert!(chain.submissions().is_empty());
}
