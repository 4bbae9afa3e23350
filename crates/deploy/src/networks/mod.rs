//! Network profile registry.
//!
//! Networks are declared as [`NetworkSpec`]s that only name the environment keys holding their
//! secrets. Resolving a spec against a [`ResolvedConfig`] yields a fully populated
//! [`NetworkProfile`]; there is no partially resolved profile.

mod defaults;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    env::{ConfigKey, KeyShape, ResolvedConfig},
    error::DeployError,
};

pub use defaults::{DEFAULT_NETWORK, LOCAL_FORK_BLOCK, LOCAL_NODE_URL};

/// Where a non-secret value such as an endpoint comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Read from an environment key.
    Env(String),
    /// A literal URL. Only used for local endpoints.
    Url(String),
}

impl ValueSource {
    fn config_key(&self, shape: KeyShape) -> Option<ConfigKey> {
        match self {
            Self::Env(key) => Some(ConfigKey::required(key, shape)),
            Self::Url(_) => None,
        }
    }

    fn resolve_url(&self, config: &ResolvedConfig) -> Result<Url, DeployError> {
        let (key, raw) = match self {
            Self::Env(key) => (key.as_str(), config.require(key)?),
            Self::Url(url) => ("url", url.as_str()),
        };
        Url::parse(raw).map_err(|e| DeployError::InvalidConfiguration {
            key: key.to_string(),
            reason: format!("not a valid URL: {e}"),
        })
    }
}

/// Declared signing credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CredentialSpec {
    /// HD accounts derived from a mnemonic stored in `env`.
    Mnemonic {
        env: String,
        #[serde(default = "default_derivation_path")]
        derivation_path: String,
        #[serde(default)]
        initial_index: u32,
        #[serde(default = "default_account_count")]
        count: u32,
    },
    /// A raw private key stored in `env`.
    PrivateKey { env: String },
}

fn default_derivation_path() -> String {
    "m/44'/60'/0'/0".to_string()
}

fn default_account_count() -> u32 {
    20
}

impl CredentialSpec {
    fn config_key(&self) -> ConfigKey {
        match self {
            Self::Mnemonic { env, .. } => ConfigKey::required(env, KeyShape::Mnemonic),
            Self::PrivateKey { env } => ConfigKey::required(env, KeyShape::PrivateKey),
        }
    }
}

/// Resolved signing credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Mnemonic {
        phrase: String,
        derivation_path: String,
        initial_index: u32,
        count: u32,
    },
    PrivateKey(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mnemonic {
                derivation_path,
                initial_index,
                count,
                ..
            } => f
                .debug_struct("Mnemonic")
                .field("phrase", &"<redacted>")
                .field("derivation_path", derivation_path)
                .field("initial_index", initial_index)
                .field("count", count)
                .finish(),
            Self::PrivateKey(_) => f.debug_tuple("PrivateKey").field(&"<redacted>").finish(),
        }
    }
}

/// Gas price selection for submitted transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GasPricePolicy {
    /// Ask the node via `eth_gasPrice`.
    #[default]
    Auto,
    /// A fixed price in wei.
    FixedWei(u64),
}

/// Declared block-explorer verification endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExplorerSpec {
    /// Etherscan-compatible API endpoint.
    pub api_url: String,
    /// Environment key holding the API key.
    pub api_key_env: String,
    /// Human-facing explorer URL, used for links in the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_url: Option<String>,
}

/// Resolved explorer endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ExplorerProfile {
    pub api_url: Url,
    pub api_key: String,
    pub browser_url: Option<Url>,
}

impl std::fmt::Debug for ExplorerProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplorerProfile")
            .field("api_url", &self.api_url.as_str())
            .field("api_key", &"<redacted>")
            .field("browser_url", &self.browser_url.as_ref().map(Url::as_str))
            .finish()
    }
}

impl ExplorerProfile {
    /// Link to an address page on the explorer, if a browser URL is known.
    pub fn address_url(&self, address: &str) -> Option<String> {
        self.browser_url
            .as_ref()
            .map(|base| format!("{}/address/{}", base.as_str().trim_end_matches('/'), address))
    }
}

/// Declared fork parameters for a local simulated network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForkSpec {
    /// Archive endpoint to replay state from.
    pub url: ValueSource,
    /// Pinned block height. Latest if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// EVM hardfork to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardfork: Option<String>,
    /// Number of funded dev accounts.
    #[serde(default = "default_account_count")]
    pub accounts: u32,
    /// Balance of each dev account, in ether.
    #[serde(default = "default_balance_ether")]
    pub balance_ether: u64,
    /// Initial base fee per gas, in wei.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_base_fee: Option<u64>,
    /// Lift the EIP-170 contract size limit.
    #[serde(default)]
    pub allow_unlimited_contract_size: bool,
}

fn default_balance_ether() -> u64 {
    10_000
}

/// Resolved fork parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkProfile {
    pub url: Url,
    pub block_number: Option<u64>,
    pub hardfork: Option<String>,
    pub accounts: u32,
    pub balance_ether: u64,
    pub initial_base_fee: Option<u64>,
    pub allow_unlimited_contract_size: bool,
}

/// A network declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub chain_id: u64,
    /// JSON-RPC endpoint.
    pub rpc: ValueSource,
    pub credential: CredentialSpec,
    #[serde(default)]
    pub gas_price: GasPricePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer: Option<ExplorerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork: Option<ForkSpec>,
    /// Concrete contract to deploy for each logical contract name on this network.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contracts: BTreeMap<String, String>,
}

impl NetworkSpec {
    /// Keys this network needs, in resolution order: credential, endpoints, explorer.
    pub fn required_keys(&self) -> Vec<ConfigKey> {
        let mut keys = vec![self.credential.config_key()];
        keys.extend(self.rpc.config_key(KeyShape::Url));
        if let Some(fork) = &self.fork {
            keys.extend(fork.url.config_key(KeyShape::Url));
        }
        if let Some(explorer) = &self.explorer {
            keys.push(ConfigKey::required(&explorer.api_key_env, KeyShape::ApiKey));
        }
        keys
    }
}

/// A fully resolved network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProfile {
    pub id: String,
    pub chain_id: u64,
    pub rpc_url: Url,
    pub credential: Credential,
    pub gas_price: GasPricePolicy,
    pub explorer: Option<ExplorerProfile>,
    pub fork: Option<ForkProfile>,
    pub contracts: BTreeMap<String, String>,
}

impl NetworkProfile {
    /// The concrete contract deployed for `logical` on this network.
    ///
    /// Names without a mapping are used as-is.
    pub fn contract_variant<'a>(&'a self, logical: &'a str) -> &'a str {
        self.contracts
            .get(logical)
            .map(String::as_str)
            .unwrap_or(logical)
    }

    /// Whether this network is a local simulated fork.
    pub fn is_local_fork(&self) -> bool {
        self.fork.is_some()
    }
}

/// Registry of known networks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkRegistry {
    networks: BTreeMap<String, NetworkSpec>,
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self {
            networks: defaults::builtin_networks(),
        }
    }
}

impl NetworkRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            networks: BTreeMap::new(),
        }
    }

    /// Add or replace a network.
    pub fn insert(&mut self, id: impl Into<String>, spec: NetworkSpec) {
        self.networks.insert(id.into(), spec);
    }

    /// Registered network identifiers, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.networks.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NetworkSpec)> {
        self.networks.iter().map(|(id, spec)| (id.as_str(), spec))
    }

    /// The declaration for `id`.
    pub fn spec(&self, id: &str) -> Result<&NetworkSpec, DeployError> {
        self.networks
            .get(id)
            .ok_or_else(|| DeployError::unknown_network(id))
    }

    /// Configuration keys required to resolve `id`.
    pub fn required_keys(&self, id: &str) -> Result<Vec<ConfigKey>, DeployError> {
        Ok(self.spec(id)?.required_keys())
    }

    /// Resolve `id` into a complete profile using already-resolved configuration values.
    pub fn resolve(&self, id: &str, config: &ResolvedConfig) -> Result<NetworkProfile, DeployError> {
        let spec = self.spec(id)?;

        let credential = match &spec.credential {
            CredentialSpec::Mnemonic {
                env,
                derivation_path,
                initial_index,
                count,
            } => Credential::Mnemonic {
                phrase: config.require(env)?.to_string(),
                derivation_path: derivation_path.clone(),
                initial_index: *initial_index,
                count: *count,
            },
            CredentialSpec::PrivateKey { env } => {
                Credential::PrivateKey(config.require(env)?.to_string())
            }
        };

        let rpc_url = spec.rpc.resolve_url(config)?;

        let fork = spec
            .fork
            .as_ref()
            .map(|fork| -> Result<ForkProfile, DeployError> {
                Ok(ForkProfile {
                    url: fork.url.resolve_url(config)?,
                    block_number: fork.block_number,
                    hardfork: fork.hardfork.clone(),
                    accounts: fork.accounts,
                    balance_ether: fork.balance_ether,
                    initial_base_fee: fork.initial_base_fee,
                    allow_unlimited_contract_size: fork.allow_unlimited_contract_size,
                })
            })
            .transpose()?;

        let explorer = spec
            .explorer
            .as_ref()
            .map(|explorer| -> Result<ExplorerProfile, DeployError> {
                let invalid = |reason: String| DeployError::InvalidConfiguration {
                    key: format!("networks.{id}.explorer"),
                    reason,
                };
                Ok(ExplorerProfile {
                    api_url: Url::parse(&explorer.api_url)
                        .map_err(|e| invalid(format!("invalid api_url: {e}")))?,
                    api_key: config.require(&explorer.api_key_env)?.to_string(),
                    browser_url: explorer
                        .browser_url
                        .as_deref()
                        .map(Url::parse)
                        .transpose()
                        .map_err(|e| invalid(format!("invalid browser_url: {e}")))?,
                })
            })
            .transpose()?;

        tracing::debug!(
            network = id,
            chain_id = spec.chain_id,
            local_fork = fork.is_some(),
            explorer = explorer.is_some(),
            "Network profile resolved"
        );

        Ok(NetworkProfile {
            id: id.to_string(),
            chain_id: spec.chain_id,
            rpc_url,
            credential,
            gas_price: spec.gas_price,
            explorer,
            fork,
            contracts: spec.contracts.clone(),
        })
    }
}
