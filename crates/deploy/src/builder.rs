//! Builder module for creating a [`Deployer`].
//!
//! [`DeployerBuilder::build`] runs every pre-flight check: it resolves the keys the selected
//! network needs, resolves the network profile and validates the plan. It never touches the
//! network, so a misconfigured run fails before anything is sent.

use std::time::Duration;

use crate::{
    Deployer,
    env::{EnvSource, ProcessEnv, ResolvedConfig},
    error::DeployError,
    project::ProjectConfig,
};

/// Builder for creating a [`Deployer`].
///
/// # Example
///
/// ```no_run
/// use chainship_deploy::{DeployerBuilder, ProjectConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let deployer = DeployerBuilder::new(ProjectConfig::load("Chainship.toml")?)
///     .network("bsc")
///     .confirmations(3)
///     .build()?;
/// let results = deployer.deploy(None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DeployerBuilder {
    /// The project configuration.
    project: ProjectConfig,
    /// The target network (optional, the project default if not provided).
    network: Option<String>,
    /// Confirmation depth for every step.
    confirmations: Option<u64>,
    /// Bound on the confirmation wait of one step.
    confirmation_timeout: Option<Duration>,
    /// Whether to verify deployed contracts.
    verify: Option<bool>,
}

impl DeployerBuilder {
    /// Create a new [`DeployerBuilder`] from a project configuration.
    pub fn new(project: ProjectConfig) -> Self {
        Self {
            project,
            network: None,
            confirmations: None,
            confirmation_timeout: None,
            verify: None,
        }
    }

    /// Set the target network.
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Set the confirmation depth of every step.
    pub fn confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = Some(confirmations);
        self
    }

    /// Set the bound on the confirmation wait of one step.
    pub fn confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = Some(timeout);
        self
    }

    /// Enable or disable explorer verification.
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = Some(verify);
        self
    }

    /// Run pre-flight checks against the process environment.
    pub fn build(self) -> Result<Deployer, DeployError> {
        self.build_with_env(&ProcessEnv)
    }

    /// Run pre-flight checks against `env`.
    pub fn build_with_env<S: EnvSource>(self, env: &S) -> Result<Deployer, DeployError> {
        let mut project = self.project;

        if let Some(network) = self.network {
            project.deploy.network = network;
        }
        if let Some(confirmations) = self.confirmations {
            project.deploy.confirmations = Some(confirmations);
        }
        if let Some(timeout) = self.confirmation_timeout {
            project.deploy.confirmation_timeout_secs = timeout.as_secs();
        }
        if let Some(verify) = self.verify {
            project.deploy.verify = verify;
        }

        let network_id = project.deploy.network.clone();

        let keys = project.networks.required_keys(&network_id)?;
        let config = ResolvedConfig::resolve(&keys, env)?;
        let network = project.networks.resolve(&network_id, &config)?;

        let plan = project.effective_plan();
        plan.validate_for(&network)?;

        tracing::info!(
            network = %network.id,
            chain_id = network.chain_id,
            steps = plan.len(),
            local_fork = network.is_local_fork(),
            "Pre-flight checks passed"
        );

        Ok(Deployer {
            network,
            plan,
            compilers: project.compiler,
            settings: project.deploy,
        })
    }
}
