//! Engine configuration.

use serde::{Deserialize, Serialize};

use tether_types::{BridgeError, Result};

/// Tunables of a [`BoundaryEngine`](crate::BoundaryEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Longest null-terminated string walk, in code units.
    pub max_string_units: u32,
    /// Log one line per bound import.
    pub log_bindings: bool,
    /// Publish the built-in `__object` module.
    pub builtin_object_module: bool,
    /// Initial capacity of the handle tables.
    pub handle_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_string_units: 1 << 20,
            log_bindings: true,
            builtin_object_module: true,
            handle_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_string_units == 0 {
            return Err(BridgeError::Config(
                "max_string_units must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_string_units, 1_048_576);
    }

    #[test]
    fn test_partial_override() {
        let config =
            EngineConfig::from_json(r#"{ "log_bindings": false, "handle_capacity": 16 }"#).unwrap();
        assert!(!config.log_bindings);
        assert_eq!(config.handle_capacity, 16);
        assert!(config.builtin_object_module);
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(EngineConfig::from_json(r#"{ "max_string_units": 0 }"#).is_err());
        assert!(EngineConfig::from_json(r#"{ "unknown": 1 }"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());
    }
}
