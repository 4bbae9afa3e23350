//! Error taxonomy for pre-flight checks and deployment runs.

use std::time::Duration;

use alloy_core::primitives::{Address, TxHash};

use crate::orchestrator::DeploymentResult;

/// Errors surfaced by configuration resolution, network resolution and deployment runs.
///
/// Pre-flight variants (`MissingConfiguration`, `InvalidConfiguration`, `UnknownNetwork`,
/// `InvalidPlan`, `UnresolvedDependency`) are raised before any network side effect.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Missing configuration: please set {key} in your environment or .env file")]
    MissingConfiguration { key: String },

    #[error("Invalid configuration for {key}: {reason}")]
    InvalidConfiguration { key: String, reason: String },

    #[error("Unknown network: {network}")]
    UnknownNetwork { network: String },

    #[error("Invalid deployment plan: {reason}")]
    InvalidPlan { reason: String },

    #[error("Step `{step}` references `{dependency}`, which has not been deployed yet")]
    UnresolvedDependency { step: String, dependency: String },

    #[error("Failed to connect to network {network}")]
    Connection {
        network: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to deploy step `{step}`")]
    SubmissionFailure {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(
        "Step `{step}` was not confirmed after {waited:?} (tx {tx_hash}, expected address {expected_address})"
    )]
    DeploymentTimeout {
        step: String,
        tx_hash: TxHash,
        expected_address: Address,
        waited: Duration,
    },

    #[error("Deployment cancelled before step `{step}` completed")]
    Cancelled {
        step: String,
        /// Transaction already sent for this step, if any. It is not rolled back.
        tx_hash: Option<TxHash>,
    },

    #[error("Verification of step `{step}` failed: {reason}")]
    VerificationFailure { step: String, reason: String },
}

impl DeployError {
    pub(crate) fn missing(key: impl Into<String>) -> Self {
        Self::MissingConfiguration { key: key.into() }
    }

    pub(crate) fn unknown_network(network: impl Into<String>) -> Self {
        Self::UnknownNetwork {
            network: network.into(),
        }
    }
}

/// A fatal run error together with the results recorded before it.
///
/// Callers can resume manually from the failure point using `completed`.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RunFailure {
    /// Results of the steps that were confirmed before the failure, in plan order.
    pub completed: Vec<DeploymentResult>,
    /// The error that aborted the run.
    #[source]
    pub error: DeployError,
}

impl RunFailure {
    pub fn new(completed: Vec<DeploymentResult>, error: DeployError) -> Self {
        Self { completed, error }
    }
}
