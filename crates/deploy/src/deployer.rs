//! A deployment that passed pre-flight checks.

use tokio::sync::watch;

use crate::{
    artifacts::ArtifactStore,
    chain::RpcChainClient,
    compiler::CompilerProfiles,
    error::{DeployError, RunFailure},
    explorer::EtherscanVerifier,
    networks::NetworkProfile,
    orchestrator::{DeploymentResult, Orchestrator},
    plan::DeploymentPlan,
    project::DeploySettings,
};

/// Orchestrator wired to the live network and its explorer.
pub type LiveOrchestrator = Orchestrator<RpcChainClient, Option<EtherscanVerifier>>;

/// A deployment ready to run: configuration is resolved and the plan is valid.
///
/// Built by [`crate::DeployerBuilder`].
#[derive(Debug, Clone)]
pub struct Deployer {
    /// Fully resolved target network.
    pub network: NetworkProfile,
    /// Plan with run overrides applied.
    pub plan: DeploymentPlan,
    pub compilers: CompilerProfiles,
    pub settings: DeploySettings,
}

impl Deployer {
    fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(&self.settings.artifacts_dir)
    }

    /// Connect to the network and build the orchestrator.
    pub async fn connect(&self) -> Result<LiveOrchestrator, DeployError> {
        let connection = |source: anyhow::Error| DeployError::Connection {
            network: self.network.id.clone(),
            source,
        };

        let client =
            RpcChainClient::connect(&self.network, self.artifacts(), self.settings.rpc_retry)
                .await
                .map_err(connection)?;

        let verifier = self
            .network
            .explorer
            .clone()
            .map(|explorer| {
                EtherscanVerifier::new(explorer, self.artifacts()).map(|verifier| {
                    verifier.with_polling(
                        self.settings.verify_poll_interval(),
                        self.settings.verify_polls,
                    )
                })
            })
            .transpose()
            .map_err(connection)?;

        Ok(Orchestrator::new(
            client,
            verifier,
            self.compilers.clone(),
            self.settings.orchestrator_settings(),
        ))
    }

    /// Connect and run the plan.
    ///
    /// # Arguments
    /// * `cancel` - Optional flag that stops the run once set to `true`
    ///
    /// # Returns
    /// One result per step, or the results confirmed before the failure with the error.
    pub async fn deploy(
        &self,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Vec<DeploymentResult>, RunFailure> {
        let mut orchestrator = self
            .connect()
            .await
            .map_err(|error| RunFailure::new(Vec::new(), error))?;

        if let Some(cancel) = cancel {
            orchestrator = orchestrator.with_cancellation(cancel);
        }

        orchestrator.run(&self.network, &self.plan).await
    }
}
