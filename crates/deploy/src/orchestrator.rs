//! Sequential deployment of a plan against one network.
//!
//! The orchestrator owns no network code. It drives a [`ChainClient`] and an
//! [`ExplorerVerifier`], so the same run logic works against a live RPC endpoint or an
//! in-memory fake.

use std::future::Future;
use std::time::Duration;

use alloy_core::primitives::{Address, TxHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::{
    compiler::{CompilerProfile, CompilerProfiles},
    error::{DeployError, RunFailure},
    networks::NetworkProfile,
    plan::{ConstructorArg, ContractId, DeploymentPlan, DeploymentStep, step_contract},
    rpc::DEFAULT_POLL_INTERVAL,
};

/// Default bound on the confirmation wait of a single step.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// A contract creation to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub step_id: String,
    /// Concrete contract after variant resolution.
    pub contract: ContractId,
    /// Constructor arguments with step references substituted.
    pub constructor_args: Vec<String>,
    /// Compiler profile the contract was built with.
    pub compiler: CompilerProfile,
}

/// A submitted creation transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedDeployment {
    pub tx_hash: TxHash,
    /// Address derived from the sender and nonce.
    pub expected_address: Address,
}

/// State of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptStatus {
    pub success: bool,
    pub contract_address: Option<Address>,
    pub block_number: u64,
    /// Blocks including and on top of the receipt's block.
    pub confirmations: u64,
}

/// Network capability used by the orchestrator.
pub trait ChainClient: Send + Sync {
    /// Address that signs deployments.
    fn deployer_address(&self) -> Address;

    /// Sign and submit a contract creation. Must not retry on its own.
    fn submit_deployment(
        &self,
        request: &DeploymentRequest,
    ) -> impl Future<Output = anyhow::Result<SubmittedDeployment>> + Send;

    /// The receipt of `tx_hash`, or `None` while it is pending.
    fn receipt(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = anyhow::Result<Option<ReceiptStatus>>> + Send;
}

/// A source verification to submit after deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub step_id: String,
    pub contract: ContractId,
    pub address: Address,
    pub constructor_args: Vec<String>,
    pub compiler: CompilerProfile,
}

/// Result of a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "status", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum VerificationOutcome {
    Verified,
    AlreadyVerified,
    /// Verification was not attempted.
    Skipped { reason: String },
    /// Verification was attempted and failed. The deployment itself stands.
    Failed { reason: String },
}

/// Explorer capability used by the orchestrator.
pub trait ExplorerVerifier: Send + Sync {
    fn verify(
        &self,
        request: &VerificationRequest,
    ) -> impl Future<Output = anyhow::Result<VerificationOutcome>> + Send;
}

/// `None` stands for a network without an explorer: every verification is skipped.
impl<V: ExplorerVerifier> ExplorerVerifier for Option<V> {
    async fn verify(&self, request: &VerificationRequest) -> anyhow::Result<VerificationOutcome> {
        match self {
            Some(verifier) => verifier.verify(request).await,
            None => Ok(VerificationOutcome::Skipped {
                reason: "network has no explorer".to_string(),
            }),
        }
    }
}

/// Block inclusion of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub block_number: u64,
    pub confirmations: u64,
}

/// Record of one confirmed deployment step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub step_id: String,
    pub contract: ContractId,
    pub address: Address,
    pub tx_hash: TxHash,
    pub confirmation: Confirmation,
    /// Constructor arguments as submitted.
    pub constructor_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub deployed_at: DateTime<Utc>,
}

/// Timing of the confirmation wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }
}

/// Runs deployment plans step by step.
pub struct Orchestrator<C, V> {
    client: C,
    verifier: V,
    compilers: CompilerProfiles,
    settings: OrchestratorSettings,
    cancel: Option<watch::Receiver<bool>>,
}

impl<C: ChainClient, V: ExplorerVerifier> Orchestrator<C, V> {
    pub fn new(
        client: C,
        verifier: V,
        compilers: CompilerProfiles,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            client,
            verifier,
            compilers,
            settings,
            cancel: None,
        }
    }

    /// Stop the run once `cancel` turns `true`.
    ///
    /// Checked before each step and while waiting for confirmations. A transaction that was
    /// already sent stays sent.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Execute every step of `plan` in order against `network`.
    ///
    /// Stops at the first fatal error and returns the steps confirmed so far alongside it.
    pub async fn run(
        &self,
        network: &NetworkProfile,
        plan: &DeploymentPlan,
    ) -> Result<Vec<DeploymentResult>, RunFailure> {
        plan.validate_for(network)
            .map_err(|error| RunFailure::new(Vec::new(), error))?;

        tracing::info!(
            network = %network.id,
            chain_id = network.chain_id,
            deployer = %self.client.deployer_address(),
            steps = plan.len(),
            "Starting deployment"
        );

        let mut results: Vec<DeploymentResult> = Vec::with_capacity(plan.len());

        for step in &plan.steps {
            if self.is_cancelled() {
                tracing::warn!(step = %step.id, "Deployment cancelled");
                let error = DeployError::Cancelled {
                    step: step.id.clone(),
                    tx_hash: None,
                };
                return Err(RunFailure::new(results, error));
            }

            match self.execute_step(network, step, &results).await {
                Ok(result) => results.push(result),
                Err(error) => {
                    tracing::error!(step = %step.id, error = %error, "Deployment step failed");
                    return Err(RunFailure::new(results, error));
                }
            }
        }

        tracing::info!(network = %network.id, deployed = results.len(), "Deployment complete");

        Ok(results)
    }

    async fn execute_step(
        &self,
        network: &NetworkProfile,
        step: &DeploymentStep,
        completed: &[DeploymentResult],
    ) -> Result<DeploymentResult, DeployError> {
        let contract = step_contract(step, network)?;
        let compiler = self.compilers.select_for(&contract).clone();
        let constructor_args = resolve_args(step, completed)?;

        tracing::info!(
            step = %step.id,
            %contract,
            args = ?constructor_args,
            runs = compiler.optimizer.runs,
            "Deploying contract"
        );

        let request = DeploymentRequest {
            step_id: step.id.clone(),
            contract: contract.clone(),
            constructor_args: constructor_args.clone(),
            compiler: compiler.clone(),
        };

        let submitted = self
            .client
            .submit_deployment(&request)
            .await
            .map_err(|source| DeployError::SubmissionFailure {
                step: step.id.clone(),
                source,
            })?;

        tracing::debug!(
            step = %step.id,
            tx_hash = %submitted.tx_hash,
            expected_address = %submitted.expected_address,
            "Deployment submitted"
        );

        let receipt = self.wait_for_confirmations(step, &submitted).await?;

        let mut warnings = Vec::new();
        let address = match receipt.contract_address {
            Some(address) if address != submitted.expected_address => {
                warnings.push(format!(
                    "contract address {address} differs from expected {}",
                    submitted.expected_address
                ));
                address
            }
            Some(address) => address,
            None => submitted.expected_address,
        };

        tracing::info!(
            step = %step.id,
            %contract,
            %address,
            block = receipt.block_number,
            "Contract deployed"
        );

        let verification = if step.verify {
            let request = VerificationRequest {
                step_id: step.id.clone(),
                contract: contract.clone(),
                address,
                constructor_args: constructor_args.clone(),
                compiler,
            };
            Some(match self.verifier.verify(&request).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let failure = DeployError::VerificationFailure {
                        step: step.id.clone(),
                        reason: format!("{e:#}"),
                    };
                    tracing::warn!(step = %step.id, error = %failure, "Verification failed");
                    warnings.push(failure.to_string());
                    VerificationOutcome::Failed {
                        reason: format!("{e:#}"),
                    }
                }
            })
        } else {
            None
        };

        Ok(DeploymentResult {
            step_id: step.id.clone(),
            contract,
            address,
            tx_hash: submitted.tx_hash,
            confirmation: Confirmation {
                block_number: receipt.block_number,
                confirmations: receipt.confirmations,
            },
            constructor_args,
            verification,
            warnings,
            deployed_at: Utc::now(),
        })
    }

    /// Poll the receipt until it has `step.confirmations` confirmations.
    async fn wait_for_confirmations(
        &self,
        step: &DeploymentStep,
        submitted: &SubmittedDeployment,
    ) -> Result<ReceiptStatus, DeployError> {
        let start = Instant::now();
        let timeout = self.settings.confirmation_timeout;
        let mut cancel = self.cancel.clone();

        loop {
            match self.client.receipt(submitted.tx_hash).await {
                Ok(Some(receipt)) if !receipt.success => {
                    return Err(DeployError::SubmissionFailure {
                        step: step.id.clone(),
                        source: anyhow::anyhow!(
                            "transaction {} reverted in block {}",
                            submitted.tx_hash,
                            receipt.block_number
                        ),
                    });
                }
                Ok(Some(receipt)) if receipt.confirmations >= step.confirmations => {
                    return Ok(receipt);
                }
                Ok(Some(receipt)) => {
                    tracing::debug!(
                        step = %step.id,
                        confirmations = receipt.confirmations,
                        required = step.confirmations,
                        "Waiting for confirmations"
                    );
                }
                Ok(None) => {
                    tracing::trace!(step = %step.id, tx_hash = %submitted.tx_hash, "Transaction pending");
                }
                Err(e) => {
                    tracing::warn!(step = %step.id, error = %e, "Failed to fetch receipt, retrying");
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(DeployError::DeploymentTimeout {
                    step: step.id.clone(),
                    tx_hash: submitted.tx_hash,
                    expected_address: submitted.expected_address,
                    waited: elapsed,
                });
            }

            let sleep = tokio::time::sleep(self.settings.poll_interval.min(timeout - elapsed));
            match cancel.as_mut() {
                Some(rx) => tokio::select! {
                    _ = sleep => {}
                    _ = cancelled(rx) => {
                        tracing::warn!(
                            step = %step.id,
                            tx_hash = %submitted.tx_hash,
                            "Deployment cancelled while waiting for confirmations"
                        );
                        return Err(DeployError::Cancelled {
                            step: step.id.clone(),
                            tx_hash: Some(submitted.tx_hash),
                        });
                    }
                },
                None => sleep.await,
            }
        }
    }
}

/// Resolves when the cancel flag is raised. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Substitute earlier step addresses into the constructor arguments of `step`.
fn resolve_args(
    step: &DeploymentStep,
    completed: &[DeploymentResult],
) -> Result<Vec<String>, DeployError> {
    step.args
        .iter()
        .map(|arg| match arg {
            ConstructorArg::Literal(value) => Ok(value.clone()),
            ConstructorArg::StepAddress { step: dependency } => completed
                .iter()
                .find(|result| &result.step_id == dependency)
                .map(|result| result.address.to_string())
                .ok_or_else(|| DeployError::UnresolvedDependency {
                    step: step.id.clone(),
                    dependency: dependency.clone(),
                }),
        })
        .collect()
}
