//! Scenario persistence
//!
//! Each module persists its two private scenario maps under one
//! module-scoped storage key. Only user edits are persisted; values seeded
//! from defaults, imported or calculated are rebuilt on the next session.

use std::cell::RefCell;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tandem_foundation::{FieldId, ModuleId, Scenario};

use crate::error::{Error, Result};

/// Storage key holding a module's scenario maps.
pub fn storage_key(module: &ModuleId) -> String {
    format!("tandem.{module}.scenarios")
}

/// Durable key/value storage for persisted scenario maps
pub trait ScenarioStorage {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, contents: &str) -> Result<()>;
}

/// On-disk layout of a module's scenario maps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedScenarios {
    #[serde(default)]
    pub target: IndexMap<FieldId, String>,
    #[serde(default)]
    pub reference: IndexMap<FieldId, String>,
}

impl PersistedScenarios {
    pub fn get(&self, scenario: Scenario) -> &IndexMap<FieldId, String> {
        match scenario {
            Scenario::Target => &self.target,
            Scenario::Reference => &self.reference,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// In-memory storage, shared between clones
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Rc<RefCell<IndexMap<String, String>>>,
    saves: Rc<RefCell<u64>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw contents stored under `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    /// Number of `save` calls made so far.
    pub fn save_count(&self) -> u64 {
        *self.saves.borrow()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl ScenarioStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    fn save(&self, key: &str, contents: &str) -> Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), contents.to_string());
        *self.saves.borrow_mut() += 1;
        Ok(())
    }
}

/// One JSON file per storage key inside a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    /// Open a storage directory, creating it if needed.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|e| {
            Error::Persistence(format!(
                "failed to create storage directory {}: {e}",
                directory.display()
            ))
        })?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.json"))
    }
}

impl ScenarioStorage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, contents: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "scenarios persisted");
        Ok(())
    }
}
