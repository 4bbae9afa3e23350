//! Local signers built from resolved network credentials.

use std::str::FromStr;

use alloy_core::primitives::Address;
use alloy_signer_local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English};
use anyhow::{Context, Result};

use crate::networks::Credential;

/// Derive the signer at `index` from a mnemonic phrase.
fn mnemonic_signer(phrase: &str, derivation_path: &str, index: u32) -> Result<PrivateKeySigner> {
    let path = format!("{}/{}", derivation_path.trim_end_matches('/'), index);
    MnemonicBuilder::<English>::default()
        .phrase(phrase)
        .derivation_path(&path)
        .with_context(|| format!("Invalid derivation path {path}"))?
        .build()
        .context("Failed to derive signer from mnemonic")
}

/// Build the deployer signer for a credential.
///
/// For mnemonics this is the account at the configured initial index.
pub fn deployer_signer(credential: &Credential) -> Result<PrivateKeySigner> {
    match credential {
        Credential::Mnemonic {
            phrase,
            derivation_path,
            initial_index,
            ..
        } => mnemonic_signer(phrase, derivation_path, *initial_index),
        Credential::PrivateKey(key) => PrivateKeySigner::from_str(key.trim())
            .context("Failed to parse private key"),
    }
}

/// Addresses of every account a credential exposes.
pub fn account_addresses(credential: &Credential) -> Result<Vec<Address>> {
    match credential {
        Credential::Mnemonic {
            phrase,
            derivation_path,
            initial_index,
            count,
        } => (*initial_index..initial_index.saturating_add(*count))
            .map(|index| mnemonic_signer(phrase, derivation_path, index).map(|s| s.address()))
            .collect(),
        Credential::PrivateKey(_) => Ok(vec![deployer_signer(credential)?.address()]),
    }
}
