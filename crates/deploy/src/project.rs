//! Project configuration (`Chainship.toml`).
//!
//! Values are layered with figment: built-in defaults, then the project file, then
//! `CHAINSHIP_`-prefixed environment variables (`__` separates nested keys, e.g.
//! `CHAINSHIP_DEPLOY__NETWORK=bsc`). Secrets never live here; networks only name the
//! environment keys that hold them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    artifacts::DEFAULT_ARTIFACTS_DIR,
    compiler::CompilerProfiles,
    explorer::{DEFAULT_STATUS_POLL_INTERVAL, DEFAULT_STATUS_POLLS},
    networks::{DEFAULT_NETWORK, NetworkRegistry},
    orchestrator::{DEFAULT_CONFIRMATION_TIMEOUT, OrchestratorSettings},
    plan::DeploymentPlan,
    rpc::{DEFAULT_POLL_INTERVAL, RetryPolicy},
};

/// Name of the project configuration file.
pub const PROJECT_FILENAME: &str = "Chainship.toml";

/// Prefix of environment variables that override project configuration.
pub const ENV_PREFIX: &str = "CHAINSHIP_";

/// Run settings, the `[deploy]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Network used when none is given on the command line.
    pub network: String,
    /// Confirmation depth applied to every step, overriding the plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    /// Bound on the confirmation wait of one step, in seconds.
    pub confirmation_timeout_secs: u64,
    /// Delay between receipt polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Submit explorer verification after each deployment.
    pub verify: bool,
    /// Delay between verification status checks, in seconds.
    pub verify_poll_interval_secs: u64,
    /// Verification status checks before giving up.
    pub verify_polls: usize,
    /// Hardhat artifacts directory.
    pub artifacts_dir: PathBuf,
    /// Retry policy for read-only RPC calls.
    pub rpc_retry: RetryPolicy,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            confirmations: None,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT.as_secs(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            verify: true,
            verify_poll_interval_secs: DEFAULT_STATUS_POLL_INTERVAL.as_secs(),
            verify_polls: DEFAULT_STATUS_POLLS,
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            rpc_retry: RetryPolicy::default(),
        }
    }
}

impl DeploySettings {
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
        }
    }

    pub fn verify_poll_interval(&self) -> Duration {
        Duration::from_secs(self.verify_poll_interval_secs)
    }
}

/// The full project configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProjectConfig {
    pub deploy: DeploySettings,
    pub compiler: CompilerProfiles,
    pub networks: NetworkRegistry,
    pub plan: DeploymentPlan,
}

impl ProjectConfig {
    /// The layered figment for the project file at `path`. A missing file is not an error.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        let path = path.as_ref();
        let mut figment = Figment::from(Serialized::defaults(ProjectConfig::default()));
        if path.exists() {
            figment = figment.merge(Toml::file_exact(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract a configuration from `figment`.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .context("Failed to load project configuration")?;
        tracing::debug!(
            network = %config.deploy.network,
            networks = config.networks.ids().count(),
            steps = config.plan.len(),
            "Project configuration loaded"
        );
        Ok(config)
    }

    /// Load the configuration for the project file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            tracing::info!(path = %path.display(), "Loading project configuration");
        } else {
            tracing::debug!(path = %path.display(), "No project file, using defaults");
        }
        Self::from_figment(&Self::figment(path))
    }

    /// The plan with the `[deploy]` overrides applied.
    pub fn effective_plan(&self) -> DeploymentPlan {
        let mut plan = self.plan.clone();
        if let Some(confirmations) = self.deploy.confirmations {
            plan = plan.with_confirmations(confirmations);
        }
        if !self.deploy.verify {
            plan = plan.without_verification();
        }
        plan
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }
}
