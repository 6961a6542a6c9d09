//! Identifiers for store fields and calculation modules
//!
//! Fields are addressed by spreadsheet-style ids of the form
//! `"<column-letters>_<row-number>"` (e.g. `d_12`, `h_124`). Modules are
//! addressed by free-form names (e.g. `"heating"`).

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing identifiers and store keys
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("empty key")]
    Empty,

    #[error("malformed field id '{0}': expected <column>_<row>")]
    MalformedField(String),
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// Base identifier of a field, without any scenario prefix.
    ///
    /// `From<&str>` does not validate; use [`FieldId::parse`] for input
    /// coming from outside the process (imports, CLI arguments).
    FieldId
);

define_id!(
    /// Unique identifier for a calculation module
    ModuleId
);

impl FieldId {
    /// Parse and validate a base field id.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        if s.is_empty() {
            return Err(KeyError::Empty);
        }
        if !is_well_formed(s) {
            return Err(KeyError::MalformedField(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Check the `<column>_<row>` shape.
    pub fn is_well_formed(&self) -> bool {
        is_well_formed(&self.0)
    }

    /// Column part (`"d"` for `d_12`), if well formed.
    pub fn column(&self) -> Option<&str> {
        self.0.split_once('_').map(|(col, _)| col)
    }

    /// Row number (`12` for `d_12`), if well formed.
    pub fn row(&self) -> Option<u32> {
        self.0.split_once('_').and_then(|(_, row)| row.parse().ok())
    }
}

fn is_well_formed(s: &str) -> bool {
    match s.split_once('_') {
        Some((col, row)) => {
            !col.is_empty()
                && !row.is_empty()
                && col.chars().all(|c| c.is_ascii_alphabetic())
                && row.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
