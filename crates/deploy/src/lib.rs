//! chainship-deploy - Environment-driven contract deployment across EVM networks.
//!
//! This crate resolves deployment secrets from the environment, selects a network and
//! compiler profile, and deploys a plan of dependent contracts one step at a time with
//! confirmation waits and explorer verification.

pub mod artifacts;
pub mod chain;
pub mod compiler;
pub mod env;
pub mod error;
pub mod explorer;
pub mod fork;
pub mod networks;
pub mod orchestrator;
pub mod plan;
pub mod project;
pub mod rpc;
pub mod signer;

mod builder;
pub use builder::DeployerBuilder;

mod deployer;
pub use deployer::{Deployer, LiveOrchestrator};

pub use artifacts::{ArtifactStore, BuildInfo, ContractArtifact};
pub use chain::RpcChainClient;
pub use compiler::{CompilerProfile, CompilerProfiles, OptimizerDetails, OptimizerSettings};
pub use env::{ConfigKey, EnvSource, KeyShape, ProcessEnv, ResolvedConfig};
pub use error::{DeployError, RunFailure};
pub use explorer::EtherscanVerifier;
pub use fork::{AnvilCmdBuilder, LocalForkNode};
pub use networks::{
    Credential, CredentialSpec, ExplorerProfile, ExplorerSpec, ForkProfile, ForkSpec,
    GasPricePolicy, NetworkProfile, NetworkRegistry, NetworkSpec, ValueSource,
};
pub use orchestrator::{
    ChainClient, Confirmation, DeploymentRequest, DeploymentResult, ExplorerVerifier,
    Orchestrator, OrchestratorSettings, ReceiptStatus, SubmittedDeployment, VerificationOutcome,
    VerificationRequest,
};
pub use plan::{ConstructorArg, ContractId, DeploymentPlan, DeploymentStep};
pub use project::{DeploySettings, PROJECT_FILENAME, ProjectConfig};
pub use rpc::RetryPolicy;
