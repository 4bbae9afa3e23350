//! Local fork node.
//!
//! Runs `anvil` with the fork parameters of a local network so that deployments replay
//! against a pinned snapshot of a live chain.

use std::process::Stdio;

use alloy_core::primitives::U64;
use anyhow::Context;
use tokio::process::{Child, Command};
use url::Url;

use crate::{
    networks::{Credential, NetworkProfile},
    rpc::{create_client, json_rpc_call, wait_until_ready},
};

/// Default binary name.
pub const DEFAULT_ANVIL_BIN: &str = "anvil";
/// Default time to wait for the node to answer RPC calls, in seconds.
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 120;

/// Builder for Anvil commands.
#[derive(Clone)]
pub struct AnvilCmdBuilder {
    host: String,
    port: u16,
    chain_id: u64,
    block_time: Option<u64>,
    fork_url: Option<String>,
    fork_block_number: Option<u64>,
    hardfork: Option<String>,
    mnemonic: Option<String>,
    derivation_path: Option<String>,
    accounts: Option<u32>,
    balance: Option<u64>,
    base_fee: Option<u64>,
    disable_code_size_limit: bool,
    extra_args: Vec<String>,
}

impl AnvilCmdBuilder {
    /// Create a new Anvil command builder.
    pub fn new(chain_id: u64) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8545,
            chain_id,
            block_time: None,
            fork_url: None,
            fork_block_number: None,
            hardfork: None,
            mnemonic: None,
            derivation_path: None,
            accounts: None,
            balance: None,
            base_fee: None,
            disable_code_size_limit: false,
            extra_args: Vec::new(),
        }
    }

    /// Builder for a local fork network, listening on the network's endpoint.
    pub fn for_network(network: &NetworkProfile) -> Result<Self, anyhow::Error> {
        let fork = network
            .fork
            .as_ref()
            .with_context(|| format!("Network {} has no fork parameters", network.id))?;

        let host = network
            .rpc_url
            .host_str()
            .context("Local node URL has no host")?;
        let port = network
            .rpc_url
            .port_or_known_default()
            .context("Local node URL has no port")?;

        let mut builder = Self::new(network.chain_id)
            .host(host)
            .port(port)
            .fork_url(fork.url.as_str())
            .fork_block_number(fork.block_number)
            .accounts(fork.accounts)
            .balance(fork.balance_ether)
            .base_fee(fork.initial_base_fee)
            .disable_code_size_limit(fork.allow_unlimited_contract_size);

        if let Some(hardfork) = &fork.hardfork {
            builder = builder.hardfork(hardfork);
        }

        if let Credential::Mnemonic {
            phrase,
            derivation_path,
            ..
        } = &network.credential
        {
            builder = builder.mnemonic(phrase, derivation_path);
        }

        Ok(builder)
    }

    /// Set the host address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Mine on an interval instead of on every transaction.
    pub fn block_time(mut self, block_time: Option<u64>) -> Self {
        self.block_time = block_time;
        self
    }

    /// Set the fork URL.
    pub fn fork_url(mut self, url: impl Into<String>) -> Self {
        self.fork_url = Some(url.into());
        self
    }

    /// Set the fork block number.
    pub fn fork_block_number(mut self, block_number: Option<u64>) -> Self {
        self.fork_block_number = block_number;
        self
    }

    pub fn hardfork(mut self, hardfork: impl Into<String>) -> Self {
        self.hardfork = Some(hardfork.into());
        self
    }

    /// Derive dev accounts from `phrase` under `derivation_path`.
    pub fn mnemonic(mut self, phrase: impl Into<String>, derivation_path: impl Into<String>) -> Self {
        self.mnemonic = Some(phrase.into());
        self.derivation_path = Some(derivation_path.into());
        self
    }

    pub fn accounts(mut self, accounts: u32) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Balance of each dev account, in ether.
    pub fn balance(mut self, ether: u64) -> Self {
        self.balance = Some(ether);
        self
    }

    pub fn base_fee(mut self, wei: Option<u64>) -> Self {
        self.base_fee = wei;
        self
    }

    pub fn disable_code_size_limit(mut self, disable: bool) -> Self {
        self.disable_code_size_limit = disable;
        self
    }

    /// Add extra arguments.
    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Build the command as a vector of strings.
    pub fn build(self) -> Vec<String> {
        let mut cmd = vec![
            "--host".to_string(),
            self.host,
            "--port".to_string(),
            self.port.to_string(),
            "--chain-id".to_string(),
            self.chain_id.to_string(),
        ];

        if let Some(fork_url) = self.fork_url {
            cmd.push("--fork-url".to_string());
            cmd.push(fork_url);
        }

        if let Some(fork_block_number) = self.fork_block_number {
            cmd.push("--fork-block-number".to_string());
            cmd.push(fork_block_number.to_string());
        }

        if let Some(hardfork) = self.hardfork {
            cmd.push("--hardfork".to_string());
            cmd.push(hardfork);
        }

        if let Some(mnemonic) = self.mnemonic {
            cmd.push("--mnemonic".to_string());
            cmd.push(mnemonic);
        }

        if let Some(path) = self.derivation_path {
            // Anvil appends the account index itself.
            cmd.push("--derivation-path".to_string());
            cmd.push(format!("{}/", path.trim_end_matches('/')));
        }

        if let Some(accounts) = self.accounts {
            cmd.push("--accounts".to_string());
            cmd.push(accounts.to_string());
        }

        if let Some(balance) = self.balance {
            cmd.push("--balance".to_string());
            cmd.push(balance.to_string());
        }

        if let Some(base_fee) = self.base_fee {
            cmd.push("--base-fee".to_string());
            cmd.push(base_fee.to_string());
        }

        if let Some(block_time) = self.block_time {
            cmd.push("--block-time".to_string());
            cmd.push(block_time.to_string());
        }

        if self.disable_code_size_limit {
            cmd.push("--disable-code-size-limit".to_string());
        }

        cmd.extend(self.extra_args);

        cmd
    }
}

/// A running local fork node. The process is killed when the handle is dropped.
pub struct LocalForkNode {
    child: Child,
    url: Url,
}

impl LocalForkNode {
    /// Spawn `binary` with the fork parameters of `network` and wait until it serves RPC.
    pub async fn start(
        network: &NetworkProfile,
        binary: &str,
        ready_timeout_secs: u64,
    ) -> Result<Self, anyhow::Error> {
        let cmd = AnvilCmdBuilder::for_network(network)?;
        Self::spawn(network, cmd, binary, ready_timeout_secs).await
    }

    /// Spawn `binary` with the arguments of `cmd` and wait until it serves `network`.
    pub async fn spawn(
        network: &NetworkProfile,
        cmd: AnvilCmdBuilder,
        binary: &str,
        ready_timeout_secs: u64,
    ) -> Result<Self, anyhow::Error> {
        let args = cmd.build();

        tracing::info!(
            network = %network.id,
            url = %network.rpc_url,
            fork_block = ?network.fork.as_ref().and_then(|f| f.block_number),
            "Starting local fork node"
        );

        let child = Command::new(binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {binary}; is Foundry installed?"))?;

        let node = Self {
            child,
            url: network.rpc_url.clone(),
        };

        let client = create_client()?;
        let expected = network.chain_id;
        wait_until_ready("local fork node", ready_timeout_secs, || {
            let client = client.clone();
            let url = node.url.clone();
            async move {
                let chain_id: U64 = json_rpc_call(&client, url.as_str(), "eth_chainId", vec![]).await?;
                if chain_id.to::<u64>() != expected {
                    anyhow::bail!("node reports chain id {chain_id}, expected {expected}");
                }
                Ok(())
            }
        })
        .await?;

        tracing::info!(url = %node.url, "Local fork node ready");

        Ok(node)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Wait for the node process to exit.
    pub async fn wait(&mut self) -> Result<(), anyhow::Error> {
        let status = self
            .child
            .wait()
            .await
            .context("Failed to wait for local fork node")?;
        tracing::info!(%status, "Local fork node exited");
        Ok(())
    }

    /// Stop the node.
    pub async fn stop(mut self) -> Result<(), anyhow::Error> {
        self.child
            .kill()
            .await
            .context("Failed to stop local fork node")?;
        tracing::info!(url = %self.url, "Local fork node stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        env::ResolvedConfig,
        networks::{LOCAL_FORK_BLOCK, NetworkRegistry},
    };

    fn local_network() -> NetworkProfile {
        let registry = NetworkRegistry::default();
        let keys = registry.required_keys("hardhat").unwrap();
        let env = HashMap::from([
            (
                "MNEMONIC".to_string(),
                "test test test test test test test test test test test junk".to_string(),
            ),
            (
                "SPEEDY_ARCHIVE_RPC".to_string(),
                "https://bsc-archive.example.org/key".to_string(),
            ),
        ]);
        let config = ResolvedConfig::resolve(&keys, &env).unwrap();
        registry.resolve("hardhat", &config).unwrap()
    }

    fn value_after<'a>(cmd: &'a [String], flag: &str) -> Option<&'a str> {
        cmd.iter()
            .position(|arg| arg == flag)
            .and_then(|i| cmd.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_anvil_cmd_builder() {
        let cmd = AnvilCmdBuilder::new(56)
            .port(9545)
            .fork_url("https://bsc-dataseed.example.org")
            .block_time(Some(3))
            .build();

        assert_eq!(value_after(&cmd, "--chain-id"), Some("56"));
        assert_eq!(value_after(&cmd, "--port"), Some("9545"));
        assert_eq!(value_after(&cmd, "--block-time"), Some("3"));
        assert!(!cmd.contains(&"--disable-code-size-limit".to_string()));
    }

    #[test]
    fn test_cmd_for_local_network() {
        let cmd = AnvilCmdBuilder::for_network(&local_network()).unwrap().build();

        assert_eq!(value_after(&cmd, "--host"), Some("127.0.0.1"));
        assert_eq!(value_after(&cmd, "--port"), Some("8545"));
        assert_eq!(value_after(&cmd, "--chain-id"), Some("31337"));
        assert_eq!(
            value_after(&cmd, "--fork-url"),
            Some("https://bsc-archive.example.org/key")
        );
        assert_eq!(
            value_after(&cmd, "--fork-block-number"),
            Some(LOCAL_FORK_BLOCK.to_string().as_str())
        );
        assert_eq!(value_after(&cmd, "--hardfork"), Some("london"));
        assert_eq!(value_after(&cmd, "--derivation-path"), Some("m/44'/60'/0'/0/"));
        assert_eq!(value_after(&cmd, "--accounts"), Some("20"));
        assert_eq!(value_after(&cmd, "--balance"), Some("10000"));
        assert_eq!(value_after(&cmd, "--base-fee"), Some("100000000"));
        assert!(cmd.contains(&"--disable-code-size-limit".to_string()));
    }

    #[test]
    fn test_extra_args_come_last() {
        let cmd = AnvilCmdBuilder::for_network(&local_network())
            .unwrap()
            .block_time(Some(2))
            .extra_args(["--steps-tracing", "--silent"])
            .build();

        assert_eq!(value_after(&cmd, "--block-time"), Some("2"));
        assert_eq!(&cmd[cmd.len() - 2..], ["--steps-tracing", "--silent"]);
    }

    #[test]
    fn test_remote_network_has_no_fork() {
        let mut network = local_network();
        network.fork = None;
        assert!(AnvilCmdBuilder::for_network(&network).is_err());
    }
}
