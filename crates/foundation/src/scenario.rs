//! Scenarios and scenario-qualified store keys
//!
//! Every field exists twice: once under the user's Target design and once
//! under the Reference baseline. Inside the workspace the pair is carried
//! as a structured [`ScenarioKey`]; the `ref_` prefix only appears when the
//! key is serialized for the value store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::{FieldId, KeyError};

/// Store-key prefix marking the Reference scenario.
pub const REFERENCE_PREFIX: &str = "ref_";

/// One of the two parallel scenarios every module computes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    /// The user's as-designed model
    #[default]
    Target,
    /// The comparison baseline
    Reference,
}

impl Scenario {
    /// Both scenarios, in the order a dual-engine pass computes them.
    pub const ALL: [Scenario; 2] = [Scenario::Target, Scenario::Reference];

    /// The opposite scenario.
    pub fn other(self) -> Self {
        match self {
            Scenario::Target => Scenario::Reference,
            Scenario::Reference => Scenario::Target,
        }
    }

    /// Build the key of `field` under this scenario.
    pub fn key(self, field: impl Into<FieldId>) -> ScenarioKey {
        ScenarioKey::new(field, self)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::Target => write!(f, "target"),
            Scenario::Reference => write!(f, "reference"),
        }
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "target" => Ok(Scenario::Target),
            "reference" | "ref" => Ok(Scenario::Reference),
            other => Err(format!("unknown scenario '{other}'")),
        }
    }
}

/// A field id qualified by the scenario it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScenarioKey {
    pub base: FieldId,
    pub scenario: Scenario,
}

impl ScenarioKey {
    pub fn new(base: impl Into<FieldId>, scenario: Scenario) -> Self {
        Self {
            base: base.into(),
            scenario,
        }
    }

    pub fn target(base: impl Into<FieldId>) -> Self {
        Self::new(base, Scenario::Target)
    }

    pub fn reference(base: impl Into<FieldId>) -> Self {
        Self::new(base, Scenario::Reference)
    }

    /// Serialize to the flat string used by the value store.
    pub fn to_store_key(&self) -> String {
        match self.scenario {
            Scenario::Target => self.base.0.clone(),
            Scenario::Reference => format!("{REFERENCE_PREFIX}{}", self.base.0),
        }
    }

    /// Parse a store key, validating the base id.
    pub fn parse(key: &str) -> Result<Self, KeyError> {
        let lenient = Self::from_store_key(key);
        FieldId::parse(lenient.base.as_str())?;
        Ok(lenient)
    }

    /// Split a store key into base id and scenario without validating the base.
    pub fn from_store_key(key: &str) -> Self {
        match key.strip_prefix(REFERENCE_PREFIX) {
            Some(base) => Self::reference(base),
            None => Self::target(key),
        }
    }

    /// The same field under the other scenario.
    pub fn counterpart(&self) -> Self {
        Self::new(self.base.clone(), self.scenario.other())
    }
}

impl fmt::Display for ScenarioKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_key_serialization() {
        assert_eq!(ScenarioKey::target("d_12").to_store_key(), "d_12");
        assert_eq!(ScenarioKey::reference("d_12").to_store_key(), "ref_d_12");
    }

    #[test]
    fn test_parse_store_key() {
        let key = ScenarioKey::parse("ref_h_124").unwrap();
        assert_eq!(key.scenario, Scenario::Reference);
        assert_eq!(key.base.as_str(), "h_124");

        let key = ScenarioKey::parse("h_124").unwrap();
        assert_eq!(key.scenario, Scenario::Target);

        assert!(ScenarioKey::parse("ref_").is_err());
        assert!(ScenarioKey::parse("ref_total").is_err());
    }

    #[test]
    fn test_counterpart() {
        let key = ScenarioKey::target("m_129");
        assert_eq!(key.counterpart().to_store_key(), "ref_m_129");
        assert_eq!(key.counterpart().counterpart(), key);
    }

    #[test]
    fn test_scenario_from_str() {
        assert_eq!("Reference".parse::<Scenario>(), Ok(Scenario::Reference));
        assert_eq!("target".parse::<Scenario>(), Ok(Scenario::Target));
        assert!("baseline".parse::<Scenario>().is_err());
    }
}
