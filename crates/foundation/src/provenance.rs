//! Provenance tags recorded with every stored value

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a stored value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Seeded from a module's declared defaults
    Default,
    /// Entered by the user; the only provenance that is persisted
    UserModified,
    /// Produced by a calculation pass
    Calculated,
    /// Loaded by the bulk import layer
    Imported,
}

impl Provenance {
    pub const ALL: [Provenance; 4] = [
        Provenance::Default,
        Provenance::UserModified,
        Provenance::Calculated,
        Provenance::Imported,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Default => "default",
            Provenance::UserModified => "user-modified",
            Provenance::Calculated => "calculated",
            Provenance::Imported => "imported",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
