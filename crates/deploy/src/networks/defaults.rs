//! Built-in network declarations.

use std::collections::BTreeMap;

use super::{CredentialSpec, ExplorerSpec, ForkSpec, GasPricePolicy, NetworkSpec, ValueSource};

/// Network used when none is selected.
pub const DEFAULT_NETWORK: &str = "hardhat";
/// Endpoint of the local fork node.
pub const LOCAL_NODE_URL: &str = "http://127.0.0.1:8545/";
/// Block the local network forks from.
pub const LOCAL_FORK_BLOCK: u64 = 25_326_200;

const PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";

/// `(id, chain id, rpc key, explorer (api url, api key env, browser url), chain label)`
type RemoteNetwork = (
    &'static str,
    u64,
    &'static str,
    Option<(&'static str, &'static str, &'static str)>,
    &'static str,
);

const REMOTE_NETWORKS: &[RemoteNetwork] = &[
    (
        "polygon",
        137,
        "POLYGON_PRIVATE_RPC",
        Some((
            "https://api.polygonscan.com/api",
            "POLYGONSCAN_API_KEY",
            "https://polygonscan.com",
        )),
        "Polygon",
    ),
    (
        "bsc",
        56,
        "BNB_PRIVATE_RPC",
        Some((
            "https://api.bscscan.com/api",
            "BSCSCAN_API_KEY",
            "https://bscscan.com",
        )),
        "BSC",
    ),
    (
        "cronos",
        25,
        "CRONOS_PRIVATE_RPC",
        Some((
            "https://api.cronoscan.com/api",
            "CRONOSCAN_API_KEY",
            "https://cronoscan.com",
        )),
        "Cronos",
    ),
    (
        "bttc",
        199,
        "BTTC_PRIVATE_RPC",
        Some((
            "https://api.bttcscan.com/api",
            "BTTCSCAN_API_KEY",
            "https://bttcscan.com",
        )),
        "BTTC",
    ),
    ("iotex", 4689, "IOTEX_PRIVATE_RPC", None, "Iotex"),
    (
        "moonbeam",
        1284,
        "MOONBEAM_PRIVATE_RPC",
        Some((
            "https://api-moonbeam.moonscan.io/api",
            "MOONSCAN_API_KEY",
            "https://moonscan.io",
        )),
        "Moonbeam",
    ),
    (
        "optimism",
        10,
        "OPTIMISM_PRIVATE_RPC",
        Some((
            "https://api-optimistic.etherscan.io/api",
            "OPTIMISTIC_ETHERSCAN_API_KEY",
            "https://optimistic.etherscan.io",
        )),
        "Optimism",
    ),
];

/// Contract variants of the price getter plan for a chain label.
fn price_getter_variants(label: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("AmmInfo".to_string(), format!("AMMInfo{label}")),
        ("PriceGetter".to_string(), format!("{label}PriceGetter")),
    ])
}

pub(super) fn builtin_networks() -> BTreeMap<String, NetworkSpec> {
    let mut networks: BTreeMap<String, NetworkSpec> = REMOTE_NETWORKS
        .iter()
        .map(|(id, chain_id, rpc_env, explorer, label)| {
            let spec = NetworkSpec {
                chain_id: *chain_id,
                rpc: ValueSource::Env(rpc_env.to_string()),
                credential: CredentialSpec::PrivateKey {
                    env: PRIVATE_KEY_ENV.to_string(),
                },
                gas_price: GasPricePolicy::Auto,
                explorer: explorer.map(|(api_url, api_key_env, browser_url)| ExplorerSpec {
                    api_url: api_url.to_string(),
                    api_key_env: api_key_env.to_string(),
                    browser_url: Some(browser_url.to_string()),
                }),
                fork: None,
                contracts: price_getter_variants(label),
            };
            (id.to_string(), spec)
        })
        .collect();

    // The local network replays BSC state, so it deploys the BSC variants.
    networks.insert(
        DEFAULT_NETWORK.to_string(),
        NetworkSpec {
            chain_id: 31337,
            rpc: ValueSource::Url(LOCAL_NODE_URL.to_string()),
            credential: CredentialSpec::Mnemonic {
                env: "MNEMONIC".to_string(),
                derivation_path: "m/44'/60'/0'/0".to_string(),
                initial_index: 0,
                count: 20,
            },
            gas_price: GasPricePolicy::Auto,
            explorer: None,
            fork: Some(ForkSpec {
                url: ValueSource::Env("SPEEDY_ARCHIVE_RPC".to_string()),
                block_number: Some(LOCAL_FORK_BLOCK),
                hardfork: Some("london".to_string()),
                accounts: 20,
                balance_ether: 10_000,
                initial_base_fee: Some(100_000_000),
                allow_unlimited_contract_size: true,
            }),
            contracts: price_getter_variants("BSC"),
        },
    );

    networks
}
