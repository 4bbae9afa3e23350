//! Compiled contract artifacts.
//!
//! Artifacts are read from the Hardhat output layout:
//!
//! ```text
//! <artifacts>/<source>/<Name>.json       abi, bytecode, linkReferences
//! <artifacts>/<source>/<Name>.dbg.json   path to the build info
//! <artifacts>/build-info/<id>.json       solc version and standard-JSON input
//! ```

use std::path::PathBuf;

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier},
    json_abi::JsonAbi,
    primitives::Bytes,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::plan::ContractId;

/// Default artifacts directory, relative to the project root.
pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: String,
    source_name: String,
    abi: JsonAbi,
    bytecode: String,
    #[serde(default)]
    link_references: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugFile {
    build_info: String,
}

/// A compiled contract ready for deployment.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub contract: ContractId,
    pub abi: JsonAbi,
    /// Creation bytecode without constructor arguments.
    pub bytecode: Bytes,
}

impl ContractArtifact {
    /// ABI-encode `args` against the constructor's parameter types.
    ///
    /// Each argument is parsed from its string form, e.g. `0x…` for addresses and decimal
    /// for integers.
    pub fn encode_constructor_args(&self, args: &[String]) -> Result<Bytes> {
        let Some(constructor) = &self.abi.constructor else {
            if !args.is_empty() {
                anyhow::bail!(
                    "{} has no constructor but {} arguments were given",
                    self.contract,
                    args.len()
                );
            }
            return Ok(Bytes::new());
        };

        if constructor.inputs.len() != args.len() {
            anyhow::bail!(
                "{} constructor takes {} arguments, got {}",
                self.contract,
                constructor.inputs.len(),
                args.len()
            );
        }

        let values = constructor
            .inputs
            .iter()
            .zip(args)
            .map(|(param, arg)| -> Result<DynSolValue> {
                let ty: DynSolType = param
                    .resolve()
                    .with_context(|| format!("Unsupported constructor parameter `{}`", param.name))?;
                ty.coerce_str(arg).with_context(|| {
                    format!("Invalid value {arg:?} for constructor parameter `{}` ({ty})", param.name)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let encoded = constructor
            .abi_encode_input(&values)
            .context("Failed to encode constructor arguments")?;
        Ok(encoded.into())
    }

    /// Creation bytecode followed by the encoded constructor arguments.
    pub fn init_code(&self, args: &[String]) -> Result<Bytes> {
        let encoded = self.encode_constructor_args(args)?;
        let mut code = Vec::with_capacity(self.bytecode.len() + encoded.len());
        code.extend_from_slice(&self.bytecode);
        code.extend_from_slice(&encoded);
        Ok(code.into())
    }
}

/// Compiler metadata of the build that produced an artifact.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    /// Short version, e.g. `0.8.13`.
    pub solc_version: String,
    /// Long version, e.g. `0.8.13+commit.abaa5c0e`.
    pub solc_long_version: String,
    /// Standard-JSON compiler input, as submitted for verification.
    pub input: Value,
}

/// Reads artifacts from a Hardhat artifacts directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn artifact_path(&self, contract: &ContractId, suffix: &str) -> PathBuf {
        self.root
            .join(&contract.source)
            .join(format!("{}{}", contract.name, suffix))
    }

    /// Load the artifact for `contract`.
    pub fn load(&self, contract: &ContractId) -> Result<ContractArtifact> {
        let path = self.artifact_path(contract, ".json");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let raw: RawArtifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        if raw.contract_name != contract.name || raw.source_name != contract.source {
            anyhow::bail!(
                "Artifact {} describes {}:{}, expected {}",
                path.display(),
                raw.source_name,
                raw.contract_name,
                contract
            );
        }

        if !raw.link_references.is_empty() {
            let libraries: Vec<_> = raw.link_references.keys().cloned().collect();
            anyhow::bail!(
                "{} requires linking against external libraries ({}), which is not supported",
                contract,
                libraries.join(", ")
            );
        }

        let bytecode = hex::decode(raw.bytecode.trim_start_matches("0x"))
            .with_context(|| format!("Invalid bytecode in {}", path.display()))?;
        if bytecode.is_empty() {
            anyhow::bail!("{} has no bytecode; it may be abstract or an interface", contract);
        }

        tracing::trace!(%contract, size = bytecode.len(), "Artifact loaded");

        Ok(ContractArtifact {
            contract: contract.clone(),
            abi: raw.abi,
            bytecode: bytecode.into(),
        })
    }

    /// Load the build info that produced `contract`.
    pub fn build_info(&self, contract: &ContractId) -> Result<BuildInfo> {
        let dbg_path = self.artifact_path(contract, ".dbg.json");
        let content = std::fs::read_to_string(&dbg_path)
            .with_context(|| format!("Failed to read {}", dbg_path.display()))?;
        let dbg: DebugFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", dbg_path.display()))?;

        let parent = dbg_path
            .parent()
            .context("Debug file has no parent directory")?;
        let build_info_path = parent.join(&dbg.build_info);
        let content = std::fs::read_to_string(&build_info_path)
            .with_context(|| format!("Failed to read build info {}", build_info_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse build info {}", build_info_path.display()))
    }
}
