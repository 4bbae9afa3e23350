//! Source verification against Etherscan-compatible explorers.

use std::time::Duration;

use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;

use crate::{
    artifacts::ArtifactStore,
    networks::ExplorerProfile,
    orchestrator::{ExplorerVerifier, VerificationOutcome, VerificationRequest},
    rpc::create_client,
};

/// Default delay between verification status checks.
pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default number of status checks before giving up.
pub const DEFAULT_STATUS_POLLS: usize = 12;

const STANDARD_JSON_FORMAT: &str = "solidity-standard-json-input";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: String,
    message: String,
    result: String,
}

/// Accepted submission.
#[derive(Debug, PartialEq, Eq)]
enum Submission {
    Queued(String),
    AlreadyVerified,
}

#[derive(Debug, thiserror::Error)]
enum ExplorerError {
    #[error("not ready yet: {0}")]
    Pending(String),
    #[error("explorer rejected verification: {0}")]
    Rejected(String),
    #[error(transparent)]
    Request(#[from] anyhow::Error),
}

impl ExplorerError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

fn classify_submission(response: ApiResponse) -> Result<Submission, ExplorerError> {
    let result = response.result;
    if response.status == "1" || response.message.starts_with("OK") {
        return Ok(Submission::Queued(result));
    }

    let lower = result.to_lowercase();
    if lower.contains("already verified") {
        Ok(Submission::AlreadyVerified)
    } else if lower.contains("unable to locate contractcode") {
        // The explorer has not indexed the deployment yet.
        Err(ExplorerError::Pending(result))
    } else {
        Err(ExplorerError::Rejected(result))
    }
}

fn classify_status(response: ApiResponse) -> Result<VerificationOutcome, ExplorerError> {
    let result = response.result;
    let lower = result.to_lowercase();
    if lower.contains("pending") || lower.contains("in queue") {
        Err(ExplorerError::Pending(result))
    } else if lower.contains("already verified") {
        Ok(VerificationOutcome::AlreadyVerified)
    } else if lower.starts_with("pass") {
        Ok(VerificationOutcome::Verified)
    } else {
        Err(ExplorerError::Rejected(result))
    }
}

/// Verifies deployed contracts through an explorer's `verifysourcecode` API.
pub struct EtherscanVerifier {
    client: reqwest::Client,
    explorer: ExplorerProfile,
    artifacts: ArtifactStore,
    poll_interval: Duration,
    max_polls: usize,
}

impl EtherscanVerifier {
    pub fn new(explorer: ExplorerProfile, artifacts: ArtifactStore) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: create_client()?,
            explorer,
            artifacts,
            poll_interval: DEFAULT_STATUS_POLL_INTERVAL,
            max_polls: DEFAULT_STATUS_POLLS,
        })
    }

    /// Set the delay between status checks and how many to make.
    pub fn with_polling(mut self, interval: Duration, max_polls: usize) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.poll_interval)
            .with_max_times(self.max_polls)
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<ApiResponse, ExplorerError> {
        let response = request
            .send()
            .await
            .context("Failed to reach explorer API")?
            .json::<ApiResponse>()
            .await
            .context("Failed to parse explorer response")?;
        Ok(response)
    }

    async fn submit(&self, form: &[(&str, &str)]) -> Result<Submission, ExplorerError> {
        let request = self.client.post(self.explorer.api_url.clone()).form(form);
        classify_submission(self.call(request).await?)
    }

    async fn check_status(&self, guid: &str) -> Result<VerificationOutcome, ExplorerError> {
        let request = self.client.get(self.explorer.api_url.clone()).query(&[
            ("apikey", self.explorer.api_key.as_str()),
            ("module", "contract"),
            ("action", "checkverifystatus"),
            ("guid", guid),
        ]);
        classify_status(self.call(request).await?)
    }
}

impl ExplorerVerifier for EtherscanVerifier {
    async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationOutcome, anyhow::Error> {
        let build_info = self.artifacts.build_info(&request.contract)?;
        if !request.compiler.matches_version(&build_info.solc_long_version) {
            anyhow::bail!(
                "{} was compiled with solc {}, but its compiler profile requires {}",
                request.contract,
                build_info.solc_version,
                request.compiler.version
            );
        }

        let artifact = self.artifacts.load(&request.contract)?;
        let constructor_args = hex::encode(artifact.encode_constructor_args(&request.constructor_args)?);
        let source = serde_json::to_string(&build_info.input)
            .context("Failed to serialize standard JSON input")?;
        let address = request.address.to_string();
        let contract_name = request.contract.to_string();
        let compiler_version = format!("v{}", build_info.solc_long_version);

        let form = [
            ("apikey", self.explorer.api_key.as_str()),
            ("module", "contract"),
            ("action", "verifysourcecode"),
            ("contractaddress", address.as_str()),
            ("sourceCode", source.as_str()),
            ("codeformat", STANDARD_JSON_FORMAT),
            ("contractname", contract_name.as_str()),
            ("compilerversion", compiler_version.as_str()),
            // Misspelled by the API.
            ("constructorArguements", constructor_args.as_str()),
        ];

        tracing::info!(
            step = %request.step_id,
            contract = %request.contract,
            %address,
            explorer = %self.explorer.api_url,
            "Submitting source verification"
        );

        let submission = (|| self.submit(&form))
            .retry(self.backoff())
            .when(ExplorerError::is_retryable)
            .notify(|e, delay| {
                tracing::debug!(error = %e, ?delay, "Verification submission not accepted yet");
            })
            .await?;

        let guid = match submission {
            Submission::AlreadyVerified => {
                tracing::info!(contract = %request.contract, %address, "Contract already verified");
                return Ok(VerificationOutcome::AlreadyVerified);
            }
            Submission::Queued(guid) => guid,
        };

        let outcome = (|| self.check_status(&guid))
            .retry(self.backoff())
            .when(ExplorerError::is_retryable)
            .notify(|e, delay| {
                tracing::trace!(error = %e, ?delay, "Verification pending");
            })
            .await?;

        tracing::info!(
            contract = %request.contract,
            %address,
            outcome = %outcome,
            url = %self.explorer.address_url(&address).unwrap_or_default(),
            "Verification finished"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: &str, message: &str, result: &str) -> ApiResponse {
        ApiResponse {
            status: status.to_string(),
            message: message.to_string(),
            result: result.to_string(),
        }
    }

    #[test]
    fn test_submission_queued() {
        let submission =
            classify_submission(response("1", "OK", "ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn"))
                .unwrap();
        assert!(matches!(submission, Submission::Queued(ref guid) if guid.starts_with("ezq878")));
    }

    #[test]
    fn test_submission_already_verified() {
        let submission = classify_submission(response(
            "0",
            "NOTOK",
            "Contract source code already verified",
        ))
        .unwrap();
        assert_eq!(submission, Submission::AlreadyVerified);
    }

    #[test]
    fn test_submission_before_indexing_is_retryable() {
        let err = classify_submission(response(
            "0",
            "NOTOK",
            "Unable to locate ContractCode at 0x5fbdb2315678afecb367f032d93f642f64180aa3",
        ))
        .unwrap_err();
        assert!(err.is_retryable());

        let err = classify_submission(response("0", "NOTOK", "Invalid API Key")).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_status_outcomes() {
        assert!(
            classify_status(response("0", "NOTOK", "Pending in queue"))
                .unwrap_err()
                .is_retryable()
        );
        assert_eq!(
            classify_status(response("1", "OK", "Pass - Verified")).unwrap(),
            VerificationOutcome::Verified
        );
        assert_eq!(
            classify_status(response("0", "NOTOK", "Already Verified")).unwrap(),
            VerificationOutcome::AlreadyVerified
        );
        let err = classify_status(response("0", "NOTOK", "Fail - Unable to verify")).unwrap_err();
        assert!(err.to_string().contains("Fail - Unable to verify"));
        assert!(!err.is_retryable());
    }
}
