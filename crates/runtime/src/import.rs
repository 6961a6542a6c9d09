//! Bulk import of store values
//!
//! An import file is a flat JSON object of store keys to values:
//!
//! ```json
//! { "d_12": "100", "ref_d_12": 50, "d_14": "none" }
//! ```
//!
//! Numbers and booleans are accepted and stringified. Routing through the
//! owning facades is done by [`Model::import`](crate::model::Model::import).

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Store keys and values to load, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportBatch {
    entries: IndexMap<String, String>,
}

/// Outcome of routing an [`ImportBatch`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Keys written through an owning facade
    pub routed: Vec<String>,
    /// Keys no module owns, written straight to the store
    pub unowned: Vec<String>,
    /// Empty keys and keys naming a calculated output
    pub rejected: Vec<String>,
}

impl ImportSummary {
    pub fn total(&self) -> usize {
        self.routed.len() + self.unowned.len() + self.rejected.len()
    }
}

impl ImportBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: IndexMap<String, Value> = serde_json::from_str(json)?;
        let mut batch = Self::new();
        for (key, value) in raw {
            let value = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(Error::Generic(format!(
                        "import value for '{key}' must be a scalar, got {other}"
                    )));
                }
            };
            batch.insert(key, value);
        }
        Ok(batch)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ImportBatch {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut batch = Self::new();
        for (key, value) in iter {
            batch.insert(key, value);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_are_stringified() {
        let batch = ImportBatch::from_json(r#"{"d_12": 100, "ref_d_12": "50", "d_14": null, "x_1": true}"#)
            .unwrap();
        let entries: Vec<(&str, &str)> = batch.iter().collect();
        assert_eq!(
            entries,
            vec![("d_12", "100"), ("ref_d_12", "50"), ("d_14", ""), ("x_1", "true")]
        );
    }

    #[test]
    fn test_nested_values_rejected() {
        let err = ImportBatch::from_json(r#"{"d_12": [1, 2]}"#).unwrap_err();
        assert!(err.to_string().contains("d_12"));
        assert!(ImportBatch::from_json("not json").is_err());
    }
}
