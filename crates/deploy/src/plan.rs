//! Deployment plans.
//!
//! A plan is static data: an ordered list of steps, each naming a contract and its constructor
//! arguments. Arguments may reference the address produced by an earlier step. Plans carry no
//! network state and can be built, validated and serialized without touching a network.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{error::DeployError, networks::NetworkProfile};

/// Directory that holds contract sources, relative to the project root.
pub const SOURCES_DIR: &str = "contracts";

/// Default confirmation depth for a step.
pub const DEFAULT_CONFIRMATIONS: u64 = 1;

/// A fully qualified contract identifier: `<source path>:<contract name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContractId {
    /// Source file path, e.g. `contracts/AMMInfoBSC.sol`.
    pub source: String,
    /// Contract name inside the source file.
    pub name: String,
}

impl ContractId {
    /// Parse `path:Name`, or a bare `Name` which is assumed to live in `contracts/Name.sol`.
    pub fn parse(s: &str) -> Self {
        match s.rsplit_once(':') {
            Some((source, name)) => Self {
                source: source.to_string(),
                name: name.to_string(),
            },
            None => Self {
                source: format!("{SOURCES_DIR}/{s}.sol"),
                name: s.to_string(),
            },
        }
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.name)
    }
}

impl FromStr for ContractId {
    type Err = String;

    /// Like [`ContractId::parse`], but rejects an empty source path or contract name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("contract identifier must not be empty".to_string());
        }
        let id = Self::parse(s);
        if id.source.trim().is_empty() || id.name.trim().is_empty() {
            return Err(format!(
                "invalid contract identifier `{s}`, expected `Name` or `path/Source.sol:Name`"
            ));
        }
        Ok(id)
    }
}

impl TryFrom<String> for ContractId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContractId> for String {
    fn from(value: ContractId) -> Self {
        value.to_string()
    }
}

/// A constructor argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstructorArg {
    /// The deployed address of an earlier step.
    StepAddress { step: String },
    /// A literal value, coerced to the constructor parameter type at encoding time.
    Literal(String),
}

impl ConstructorArg {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn address_of(step: impl Into<String>) -> Self {
        Self::StepAddress { step: step.into() }
    }
}

/// One contract deployment in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentStep {
    /// Unique step identifier within the plan.
    pub id: String,
    /// Logical contract name, resolved through the network's contract variants.
    pub contract: String,
    /// Ordered constructor arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ConstructorArg>,
    /// Confirmations to wait for before the step is recorded.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Submit source verification to the network's explorer after deployment.
    #[serde(default = "default_verify")]
    pub verify: bool,
}

fn default_confirmations() -> u64 {
    DEFAULT_CONFIRMATIONS
}

fn default_verify() -> bool {
    true
}

impl DeploymentStep {
    pub fn new(id: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            contract: contract.into(),
            args: Vec::new(),
            confirmations: DEFAULT_CONFIRMATIONS,
            verify: true,
        }
    }

    pub fn arg(mut self, arg: ConstructorArg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Step identifiers this step depends on, in argument order.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(|arg| match arg {
            ConstructorArg::StepAddress { step } => Some(step.as_str()),
            ConstructorArg::Literal(_) => None,
        })
    }
}

/// An ordered list of deployment steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub steps: Vec<DeploymentStep>,
}

impl Default for DeploymentPlan {
    /// The price getter plan: an AMM info registry, then the price getter that reads it.
    fn default() -> Self {
        Self::new()
            .step(DeploymentStep::new("amm_info", "AmmInfo"))
            .step(
                DeploymentStep::new("price_getter", "PriceGetter")
                    .arg(ConstructorArg::address_of("amm_info")),
            )
    }
}

impl DeploymentPlan {
    /// An empty plan.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn step(mut self, step: DeploymentStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check that step ids are unique and every address reference points at an earlier step.
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.steps.is_empty() {
            return Err(DeployError::InvalidPlan {
                reason: "plan has no steps".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            step.contract
                .parse::<ContractId>()
                .map_err(|reason| DeployError::InvalidPlan {
                    reason: format!("step `{}`: {reason}", step.id),
                })?;
            for dependency in step.dependencies() {
                if !seen.contains(dependency) {
                    return Err(DeployError::UnresolvedDependency {
                        step: step.id.clone(),
                        dependency: dependency.to_string(),
                    });
                }
            }
            if step.confirmations == 0 {
                return Err(DeployError::InvalidPlan {
                    reason: format!("step `{}` must wait for at least one confirmation", step.id),
                });
            }
            if !seen.insert(step.id.as_str()) {
                return Err(DeployError::InvalidPlan {
                    reason: format!("duplicate step id `{}`", step.id),
                });
            }
        }

        Ok(())
    }

    /// [`Self::validate`], then check that every step resolves to a well-formed contract on
    /// `network`.
    pub fn validate_for(&self, network: &NetworkProfile) -> Result<(), DeployError> {
        self.validate()?;
        for step in &self.steps {
            step_contract(step, network)?;
        }
        Ok(())
    }

    /// Override the confirmation depth of every step.
    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        for step in &mut self.steps {
            step.confirmations = confirmations;
        }
        self
    }

    /// Disable verification for every step.
    pub fn without_verification(mut self) -> Self {
        for step in &mut self.steps {
            step.verify = false;
        }
        self
    }
}

/// The concrete contract `step` deploys on `network`.
pub(crate) fn step_contract(
    step: &DeploymentStep,
    network: &NetworkProfile,
) -> Result<ContractId, DeployError> {
    network
        .contract_variant(&step.contract)
        .parse()
        .map_err(|reason| DeployError::InvalidPlan {
            reason: format!("step `{}` on {}: {reason}", step.id, network.id),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_id_parse() {
        let bare = ContractId::parse("AMMInfoBSC");
        assert_eq!(bare.source, "contracts/AMMInfoBSC.sol");
        assert_eq!(bare.name, "AMMInfoBSC");

        let qualified = ContractId::parse("contracts/vaults/VaultHealer.sol:VaultHealer");
        assert_eq!(qualified.source, "contracts/vaults/VaultHealer.sol");
        assert_eq!(qualified.name, "VaultHealer");
        assert_eq!(
            qualified.to_string(),
            "contracts/vaults/VaultHealer.sol:VaultHealer"
        );
    }

    #[test]
    fn test_contract_id_rejects_empty_parts() {
        assert!("Foo:".parse::<ContractId>().is_err());
        assert!(":Foo".parse::<ContractId>().is_err());
        assert!("  ".parse::<ContractId>().is_err());
        assert_eq!(
            "AMMInfoBSC".parse::<ContractId>().unwrap(),
            ContractId::parse("AMMInfoBSC")
        );
        assert!(serde_json::from_str::<ContractId>("\"Foo:\"").is_err());
    }

    #[test]
    fn test_malformed_contract_in_later_step_is_rejected() {
        let plan = DeploymentPlan::new()
            .step(DeploymentStep::new("info", "AmmInfo"))
            .step(DeploymentStep::new("getter", "contracts/Getter.sol:"));
        let err = plan.validate().unwrap_err();
        assert!(matches!(
            err,
            DeployError::InvalidPlan { ref reason } if reason.contains("getter")
        ));
    }

    #[test]
    fn test_default_plan_is_valid() {
        let plan = DeploymentPlan::default();
        plan.validate().unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.steps[1].dependencies().collect::<Vec<_>>(),
            vec!["amm_info"]
        );
    }

    #[test]
    fn test_forward_reference_is_rejected() {
        let plan = DeploymentPlan::new()
            .step(DeploymentStep::new("getter", "PriceGetter").arg(ConstructorArg::address_of("info")))
            .step(DeploymentStep::new("info", "AmmInfo"));

        let err = plan.validate().unwrap_err();
        assert!(matches!(
            err,
            DeployError::UnresolvedDependency { ref step, ref dependency }
                if step == "getter" && dependency == "info"
        ));
    }

    #[test]
    fn test_self_reference_is_rejected() {
        let plan = DeploymentPlan::new()
            .step(DeploymentStep::new("info", "AmmInfo").arg(ConstructorArg::address_of("info")));
        assert!(matches!(
            plan.validate(),
            Err(DeployError::UnresolvedDependency { .. })
        ));
    }

    #[test]
    fn test_duplicate_step_is_rejected() {
        let plan = DeploymentPlan::new()
            .step(DeploymentStep::new("info", "AmmInfo"))
            .step(DeploymentStep::new("info", "AmmInfo"));
        assert!(matches!(plan.validate(), Err(DeployError::InvalidPlan { .. })));
    }

    #[test]
    fn test_empty_plan_is_rejected() {
        assert!(DeploymentPlan::new().validate().is_err());
    }

    #[test]
    fn test_plan_toml_round_trip_with_references() {
        let toml_str = r#"
            [[steps]]
            id = "amm_info"
            contract = "AmmInfo"
            verify = false

            [[steps]]
            id = "price_getter"
            contract = "PriceGetter"
            confirmations = 3
            args = [{ step = "amm_info" }, "42"]
        "#;

        let plan: DeploymentPlan = toml::from_str(toml_str).unwrap();
        plan.validate().unwrap();
        assert!(!plan.steps[0].verify);
        assert_eq!(plan.steps[0].confirmations, DEFAULT_CONFIRMATIONS);
        assert_eq!(plan.steps[1].confirmations, 3);
        assert_eq!(
            plan.steps[1].args,
            vec![
                ConstructorArg::address_of("amm_info"),
                ConstructorArg::literal("42")
            ]
        );
    }
}
