//! JSON-RPC implementation of [`ChainClient`].

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_core::primitives::{Address, Bytes, TxHash, TxKind, U64, U256};
use alloy_eips::eip2718::Encodable2718;
use alloy_network::TxSignerSync;
use alloy_signer_local::PrivateKeySigner;
use anyhow::Context;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::{
    artifacts::ArtifactStore,
    networks::{GasPricePolicy, NetworkProfile},
    orchestrator::{ChainClient, DeploymentRequest, ReceiptStatus, SubmittedDeployment},
    rpc::{RetryPolicy, create_client, json_rpc_call, json_rpc_call_with_retry},
    signer::deployer_signer,
};

/// Gas estimates are padded by this percentage.
const GAS_LIMIT_MARGIN_PERCENT: u64 = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    status: Option<U64>,
    contract_address: Option<Address>,
    block_number: Option<U64>,
}

/// Deploys contracts by signing legacy transactions locally and submitting them over JSON-RPC.
pub struct RpcChainClient {
    client: reqwest::Client,
    rpc_url: Url,
    chain_id: u64,
    signer: PrivateKeySigner,
    gas_price: GasPricePolicy,
    artifacts: ArtifactStore,
    retry: RetryPolicy,
}

impl RpcChainClient {
    /// Connect to `network` and check that the endpoint serves the expected chain.
    pub async fn connect(
        network: &NetworkProfile,
        artifacts: ArtifactStore,
        retry: RetryPolicy,
    ) -> Result<Self, anyhow::Error> {
        let signer = deployer_signer(&network.credential)?;
        let client = create_client()?;

        let remote: U64 = json_rpc_call_with_retry(
            &client,
            network.rpc_url.as_str(),
            "eth_chainId",
            vec![],
            retry,
        )
        .await
        .with_context(|| format!("Failed to query chain id from {}", network.id))?;

        if remote.to::<u64>() != network.chain_id {
            anyhow::bail!(
                "Endpoint for {} reports chain id {}, expected {}",
                network.id,
                remote,
                network.chain_id
            );
        }

        tracing::info!(
            network = %network.id,
            chain_id = network.chain_id,
            deployer = %signer.address(),
            "Connected to network"
        );

        Ok(Self {
            client,
            rpc_url: network.rpc_url.clone(),
            chain_id: network.chain_id,
            signer,
            gas_price: network.gas_price,
            artifacts,
            retry,
        })
    }

    async fn read<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, anyhow::Error> {
        json_rpc_call_with_retry(&self.client, self.rpc_url.as_str(), method, params, self.retry).await
    }

    async fn gas_price(&self) -> Result<u128, anyhow::Error> {
        match self.gas_price {
            GasPricePolicy::FixedWei(wei) => Ok(wei as u128),
            GasPricePolicy::Auto => {
                let price: U256 = self.read("eth_gasPrice", vec![]).await?;
                Ok(price.to::<u128>())
            }
        }
    }

    async fn block_number(&self) -> Result<u64, anyhow::Error> {
        let block: U64 = self.read("eth_blockNumber", vec![]).await?;
        Ok(block.to())
    }

    fn sign(&self, mut tx: TxLegacy) -> Result<Bytes, anyhow::Error> {
        let signature = self
            .signer
            .sign_transaction_sync(&mut tx)
            .context("Failed to sign transaction")?;
        let envelope = TxEnvelope::from(tx.into_signed(signature));
        Ok(envelope.encoded_2718().into())
    }
}

impl ChainClient for RpcChainClient {
    fn deployer_address(&self) -> Address {
        self.signer.address()
    }

    async fn submit_deployment(
        &self,
        request: &DeploymentRequest,
    ) -> Result<SubmittedDeployment, anyhow::Error> {
        let artifact = self.artifacts.load(&request.contract)?;
        let init_code = artifact.init_code(&request.constructor_args)?;

        let from = self.signer.address();
        let nonce: U64 = self
            .read("eth_getTransactionCount", vec![json!(from), json!("pending")])
            .await?;
        let nonce = nonce.to::<u64>();
        let gas_price = self.gas_price().await?;

        let estimate: U64 = self
            .read(
                "eth_estimateGas",
                vec![json!({ "from": from, "data": init_code })],
            )
            .await
            .with_context(|| format!("Failed to estimate gas for {}", request.contract))?;
        let gas_limit = estimate.to::<u64>() * (100 + GAS_LIMIT_MARGIN_PERCENT) / 100;

        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: TxKind::Create,
            value: U256::ZERO,
            input: init_code,
        };
        let raw = self.sign(tx)?;

        tracing::debug!(
            contract = %request.contract,
            nonce,
            gas_price,
            gas_limit,
            "Sending deployment transaction"
        );

        // Sent exactly once.
        let tx_hash: TxHash = json_rpc_call(
            &self.client,
            self.rpc_url.as_str(),
            "eth_sendRawTransaction",
            vec![json!(raw)],
        )
        .await?;

        Ok(SubmittedDeployment {
            tx_hash,
            expected_address: from.create(nonce),
        })
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<ReceiptStatus>, anyhow::Error> {
        let raw: Option<RawReceipt> = self
            .read("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let Some(block_number) = raw.block_number.map(|b| b.to::<u64>()) else {
            return Ok(None);
        };

        let head = self.block_number().await?;
        Ok(Some(receipt_status(&raw, block_number, head)))
    }
}

fn receipt_status(raw: &RawReceipt, block_number: u64, head: u64) -> ReceiptStatus {
    ReceiptStatus {
        success: raw.status.is_none_or(|status| status == U64::from(1)),
        contract_address: raw.contract_address,
        block_number,
        confirmations: head.saturating_sub(block_number) + 1,
    }
}
