//! Model session configuration
//!
//! Loaded from JSON; every field is optional.
//!
//! ```json
//! {
//!   "initial_mode": "reference",
//!   "record_pass_history": true,
//!   "persistence": { "enabled": true, "directory": "./scenarios" }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tandem_foundation::Scenario;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Scenario displayed after initialization
    pub initial_mode: Scenario,
    pub persistence: PersistenceConfig,
    /// Keep a report of every completed dispatch pass
    pub record_pass_history: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Directory for file-backed storage; in-memory storage when unset
    pub directory: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            initial_mode: Scenario::Target,
            persistence: PersistenceConfig::default(),
            record_pass_history: false,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
        }
    }
}

impl RuntimeConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RuntimeConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.persistence.directory
            && dir.as_os_str().is_empty()
        {
            return Err(Error::Config("persistence.directory is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = RuntimeConfig::from_json("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert!(config.persistence.enabled);
    }

    #[test]
    fn test_full_config() {
        let config = RuntimeConfig::from_json(
            r#"{
                "initial_mode": "reference",
                "record_pass_history": true,
                "persistence": { "enabled": false, "directory": "/tmp/tandem" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.initial_mode, Scenario::Reference);
        assert!(config.record_pass_history);
        assert!(!config.persistence.enabled);
        assert_eq!(config.persistence.directory, Some(PathBuf::from("/tmp/tandem")));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            RuntimeConfig::from_json(r#"{"initial_mode": "draft"}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_json(r#"{"persistence": {"directory": ""}}"#),
            Err(Error::Config(_))
        ));
        assert!(RuntimeConfig::from_json(r#"{"modes": 2}"#).is_err());
    }
}
