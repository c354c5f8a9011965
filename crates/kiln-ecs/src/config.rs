//! Registry configuration.

use serde::{Deserialize, Serialize};

use crate::RegistryError;

/// What to do when a structural invariant (hierarchy links, marker state)
/// is found broken at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantPolicy {
    /// Log at error level, then panic.
    Panic,
    /// Log at error level and carry on.
    Log,
}

impl Default for InvariantPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Panic
        } else {
            Self::Log
        }
    }
}

/// Settings for an [`EntityRegistry`](crate::registry::EntityRegistry).
///
/// Every field has a default, so a partial JSON object is valid:
///
/// ```
/// use kiln_ecs::config::{InvariantPolicy, RegistryConfig};
///
/// let json = r#"{ "uuid_seed": 7, "invariant_policy": "log" }"#;
/// let config = RegistryConfig::from_json(json).unwrap();
/// assert_eq!(config.uuid_seed, Some(7));
/// assert_eq!(config.invariant_policy, InvariantPolicy::Log);
/// assert!(config.enabled_by_default);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub invariant_policy: InvariantPolicy,
    /// Seed for UUID generation. `None` seeds from OS entropy.
    pub uuid_seed: Option<u64>,
    /// Attach `EnabledComponent` to entities made by `create*`. Entities
    /// restored by `deserialize` keep whatever their data says.
    pub enabled_by_default: bool,
    /// Initial value of the loaded flag. Script load/enable events only fire
    /// while the registry is loaded.
    pub start_loaded: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            invariant_policy: InvariantPolicy::default(),
            uuid_seed: None,
            enabled_by_default: true,
            start_loaded: true,
        }
    }
}

impl RegistryConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        serde_json::from_str(json).map_err(|e| RegistryError::InvalidConfig(e.to_string()))
    }

    /// Same configuration with a fixed UUID seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.uuid_seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        assert_eq!(RegistryConfig::from_json("{}").unwrap(), RegistryConfig::default());
    }

    #[test]
    fn malformed_json_is_invalid_config() {
        let err = RegistryConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidConfig(_)));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(RegistryConfig::from_json(r#"{ "invariant_policy": "ignore" }"#).is_err());
    }

    #[test]
    fn with_seed_sets_seed() {
        let config = RegistryConfig::default().with_seed(99);
        assert_eq!(config.uuid_seed, Some(99));
    }
}
