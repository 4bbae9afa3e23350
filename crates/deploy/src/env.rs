//! Configuration resolution from environment variables.
//!
//! Every key a deployment needs is declared up front as a [`ConfigKey`] and resolved in one
//! pass by [`ResolvedConfig::resolve`]. The first missing key aborts resolution, so a run never
//! reaches the network with a partial configuration.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DeployError;

/// Expected shape of a configuration value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, Default,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum KeyShape {
    /// Any non-empty value.
    #[default]
    Secret,
    /// An absolute URL.
    Url,
    /// A BIP-39 mnemonic phrase.
    Mnemonic,
    /// A 32-byte hex private key, with or without `0x`.
    PrivateKey,
    /// An explorer API key.
    ApiKey,
}

impl KeyShape {
    /// Renders a value for logs. Only the scheme and host of URLs are shown since private
    /// endpoints often embed credentials in their path or query.
    pub fn redact(&self, value: &str) -> String {
        match self {
            Self::Url => url::Url::parse(value)
                .ok()
                .and_then(|url| {
                    url.host_str()
                        .map(|host| format!("{}://{}/<redacted>", url.scheme(), host))
                })
                .unwrap_or_else(|| "<redacted>".to_string()),
            _ => "<redacted>".to_string(),
        }
    }

    fn validate(&self, value: &str) -> Result<(), String> {
        match self {
            Self::Secret | Self::ApiKey => Ok(()),
            Self::Url => url::Url::parse(value)
                .map(|_| ())
                .map_err(|e| format!("not a valid URL: {e}")),
            Self::Mnemonic => {
                let words = value.split_whitespace().count();
                if matches!(words, 12 | 15 | 18 | 21 | 24) {
                    Ok(())
                } else {
                    Err(format!("expected 12, 15, 18, 21 or 24 words, got {words}"))
                }
            }
            Self::PrivateKey => {
                let raw = value.strip_prefix("0x").unwrap_or(value);
                match hex::decode(raw) {
                    Ok(bytes) if bytes.len() == 32 => Ok(()),
                    Ok(bytes) => Err(format!("expected 32 bytes, got {}", bytes.len())),
                    Err(e) => Err(format!("not valid hex: {e}")),
                }
            }
        }
    }
}

/// A named configuration key read from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigKey {
    /// Environment variable name.
    pub name: String,
    /// Whether resolution fails when the key is absent.
    pub required: bool,
    /// Expected shape of the value.
    #[serde(default)]
    pub shape: KeyShape,
}

impl ConfigKey {
    pub fn required(name: impl Into<String>, shape: KeyShape) -> Self {
        Self {
            name: name.into(),
            required: true,
            shape,
        }
    }

    pub fn optional(name: impl Into<String>, shape: KeyShape) -> Self {
        Self {
            name: name.into(),
            required: false,
            shape,
        }
    }
}

/// A source of configuration values.
pub trait EnvSource {
    /// Returns the value of `key`, or `None` if it is unset.
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl<T: EnvSource + ?Sized> EnvSource for &T {
    fn var(&self, key: &str) -> Option<String> {
        (**self).var(key)
    }
}

/// Configuration values resolved once at startup.
///
/// There is no way to mutate a [`ResolvedConfig`] after [`ResolvedConfig::resolve`] returns.
#[derive(Clone, Default)]
pub struct ResolvedConfig {
    values: BTreeMap<String, (KeyShape, String)>,
}

impl ResolvedConfig {
    /// Resolve `keys` from `source` in declaration order.
    ///
    /// Unset and empty values are both treated as absent. The first absent required key fails
    /// with [`DeployError::MissingConfiguration`]; a present value with the wrong shape fails
    /// with [`DeployError::InvalidConfiguration`].
    pub fn resolve<S: EnvSource>(keys: &[ConfigKey], source: &S) -> Result<Self, DeployError> {
        let mut values = BTreeMap::new();

        for key in keys {
            let value = source
                .var(&key.name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());

            let Some(value) = value else {
                if key.required {
                    tracing::debug!(key = %key.name, "Required configuration key is missing");
                    return Err(DeployError::missing(&key.name));
                }
                continue;
            };

            key.shape
                .validate(&value)
                .map_err(|reason| DeployError::InvalidConfiguration {
                    key: key.name.clone(),
                    reason,
                })?;

            values.insert(key.name.clone(), (key.shape, value));
        }

        tracing::debug!(keys = ?values.keys().collect::<Vec<_>>(), "Configuration resolved");

        Ok(Self { values })
    }

    /// Returns the value for `key`, if it was resolved.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|(_, v)| v.as_str())
    }

    /// Returns the value for `key`, failing with [`DeployError::MissingConfiguration`].
    pub fn require(&self, key: &str) -> Result<&str, DeployError> {
        self.get(key).ok_or_else(|| DeployError::missing(key))
    }

    /// Names of all resolved keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, (shape, value)) in &self.values {
            map.entry(key, &shape.redact(value));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str = "test test test test test test test test test test test junk";
    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn keys() -> Vec<ConfigKey> {
        vec![
            ConfigKey::required("MNEMONIC", KeyShape::Mnemonic),
            ConfigKey::required("PRIVATE_KEY", KeyShape::PrivateKey),
            ConfigKey::required("POLYGON_PRIVATE_RPC", KeyShape::Url),
            ConfigKey::required("POLYGONSCAN_API_KEY", KeyShape::ApiKey),
        ]
    }

    fn full_env() -> HashMap<String, String> {
        HashMap::from([
            ("MNEMONIC".to_string(), TEST_MNEMONIC.to_string()),
            ("PRIVATE_KEY".to_string(), TEST_KEY.to_string()),
            (
                "POLYGON_PRIVATE_RPC".to_string(),
                "https://polygon.example.org/rpc/s3cr3t".to_string(),
            ),
            ("POLYGONSCAN_API_KEY".to_string(), "ABC123".to_string()),
        ])
    }

    #[test]
    fn test_resolves_all_keys() {
        let config = ResolvedConfig::resolve(&keys(), &full_env()).unwrap();
        assert_eq!(config.get("POLYGONSCAN_API_KEY"), Some("ABC123"));
        assert_eq!(config.keys().count(), 4);
    }

    #[test]
    fn test_each_missing_key_is_named() {
        for key in keys() {
            let mut env = full_env();
            env.remove(&key.name);

            let err = ResolvedConfig::resolve(&keys(), &env).unwrap_err();
            match err {
                DeployError::MissingConfiguration { key: missing } => {
                    assert_eq!(missing, key.name)
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn test_empty_value_is_missing() {
        let mut env = full_env();
        env.insert("PRIVATE_KEY".to_string(), "   ".to_string());

        let err = ResolvedConfig::resolve(&keys(), &env).unwrap_err();
        assert!(matches!(
            err,
            DeployError::MissingConfiguration { ref key } if key == "PRIVATE_KEY"
        ));
    }

    #[test]
    fn test_optional_key_may_be_absent() {
        let keys = vec![ConfigKey::optional("EXTRA_RPC", KeyShape::Url)];
        let config = ResolvedConfig::resolve(&keys, &HashMap::new()).unwrap();
        assert_eq!(config.get("EXTRA_RPC"), None);
        assert!(config.require("EXTRA_RPC").is_err());
    }

    #[test]
    fn test_shape_validation() {
        let mut env = full_env();
        env.insert("PRIVATE_KEY".to_string(), "0x1234".to_string());
        let err = ResolvedConfig::resolve(&keys(), &env).unwrap_err();
        assert!(matches!(
            err,
            DeployError::InvalidConfiguration { ref key, .. } if key == "PRIVATE_KEY"
        ));

        let mut env = full_env();
        env.insert("MNEMONIC".to_string(), "only three words".to_string());
        let err = ResolvedConfig::resolve(&keys(), &env).unwrap_err();
        assert!(matches!(
            err,
            DeployError::InvalidConfiguration { ref key, .. } if key == "MNEMONIC"
        ));

        let mut env = full_env();
        env.insert("POLYGON_PRIVATE_RPC".to_string(), "not a url".to_string());
        assert!(ResolvedConfig::resolve(&keys(), &env).is_err());
    }

    #[test]
    fn test_prefixed_private_key_is_accepted() {
        let mut env = full_env();
        env.insert("PRIVATE_KEY".to_string(), format!("0x{TEST_KEY}"));
        assert!(ResolvedConfig::resolve(&keys(), &env).is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ResolvedConfig::resolve(&keys(), &full_env()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains(TEST_KEY));
        assert!(!rendered.contains("ABC123"));
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("https://polygon.example.org/<redacted>"));
    }
}
