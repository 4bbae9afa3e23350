//! Compiler profile selection.
//!
//! Contracts are compiled with a default profile unless a per-source override exists. An
//! override replaces the default wholesale: no field is inherited from the default profile.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::plan::ContractId;

/// Default solc version.
pub const DEFAULT_SOLC_VERSION: &str = "0.8.13";
/// Default optimizer run count, tuned for runtime gas efficiency.
pub const DEFAULT_OPTIMIZER_RUNS: u64 = 1_000_000;
/// Source path of the contract compiled with a size-optimized profile by default.
pub const SIZE_OPTIMIZED_SOURCE: &str = "contracts/VaultHealer.sol";

/// Optimizer pass toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptimizerDetails {
    pub peephole: bool,
    pub inliner: bool,
    pub jumpdest_remover: bool,
    pub order_literals: bool,
    pub deduplicate: bool,
    pub cse: bool,
    pub constant_optimizer: bool,
    pub yul: bool,
}

impl Default for OptimizerDetails {
    fn default() -> Self {
        Self {
            peephole: true,
            inliner: true,
            jumpdest_remover: true,
            order_literals: true,
            deduplicate: true,
            cse: true,
            constant_optimizer: true,
            yul: true,
        }
    }
}

/// Optimizer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub enabled: bool,
    pub runs: u64,
    #[serde(default)]
    pub details: OptimizerDetails,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            runs: DEFAULT_OPTIMIZER_RUNS,
            details: OptimizerDetails::default(),
        }
    }
}

/// A complete compiler configuration for one contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompilerProfile {
    /// solc version, e.g. `0.8.13`.
    pub version: String,
    /// Compile through the Yul IR pipeline.
    #[serde(default)]
    pub via_ir: bool,
    pub optimizer: OptimizerSettings,
}

impl Default for CompilerProfile {
    fn default() -> Self {
        Self {
            version: DEFAULT_SOLC_VERSION.to_string(),
            via_ir: true,
            optimizer: OptimizerSettings::default(),
        }
    }
}

impl CompilerProfile {
    /// A copy of this profile with a different optimizer run count.
    pub fn with_runs(mut self, runs: u64) -> Self {
        self.optimizer.runs = runs;
        self
    }

    /// Render the standard-JSON `settings` object for this profile.
    pub fn solc_settings(&self) -> Value {
        let details = &self.optimizer.details;
        json!({
            "viaIR": self.via_ir,
            "optimizer": {
                "enabled": self.optimizer.enabled,
                "runs": self.optimizer.runs,
                "details": {
                    "peephole": details.peephole,
                    "inliner": details.inliner,
                    "jumpdestRemover": details.jumpdest_remover,
                    "orderLiterals": details.order_literals,
                    "deduplicate": details.deduplicate,
                    "cse": details.cse,
                    "constantOptimizer": details.constant_optimizer,
                    "yul": details.yul,
                },
            },
        })
    }

    /// Whether `solc_version` (short `0.8.13` or long `0.8.13+commit.abaa5c0e`) matches
    /// this profile's version.
    pub fn matches_version(&self, solc_version: &str) -> bool {
        let short = solc_version
            .trim_start_matches('v')
            .split('+')
            .next()
            .unwrap_or_default();
        short == self.version
    }
}

/// The default compiler profile and its per-source overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerProfiles {
    /// Profile used for every contract without an override.
    pub default: CompilerProfile,
    /// Overrides keyed by source path (e.g. `contracts/VaultHealer.sol`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, CompilerProfile>,
}

impl Default for CompilerProfiles {
    fn default() -> Self {
        Self {
            default: CompilerProfile::default(),
            overrides: BTreeMap::from([(
                SIZE_OPTIMIZED_SOURCE.to_string(),
                CompilerProfile::default().with_runs(1),
            )]),
        }
    }
}

impl CompilerProfiles {
    /// Select the effective profile for `contract`.
    pub fn select_for(&self, contract: &ContractId) -> &CompilerProfile {
        match self.overrides.get(&contract.source) {
            Some(profile) => {
                tracing::trace!(%contract, runs = profile.optimizer.runs, "Using compiler override");
                profile
            }
            None => &self.default,
        }
    }

    /// Register an override for `source`, replacing any existing one.
    pub fn with_override(mut self, source: impl Into<String>, profile: CompilerProfile) -> Self {
        self.overrides.insert(source.into(), profile);
        self
    }
}
