//! Tandem Foundation
//!
//! Types shared by every Tandem crate: field and module identifiers, the
//! Target/Reference scenario pair with its structured store keys, value
//! provenance, and the numeric coercion rules readers apply to stored
//! strings.

pub mod ids;
pub mod numeric;
pub mod provenance;
pub mod scenario;

pub use ids::{FieldId, KeyError, ModuleId};
pub use numeric::{NEUTRAL, format_numeric, parse_numeric, parse_or, safe_divide};
pub use provenance::Provenance;
pub use scenario::{REFERENCE_PREFIX, Scenario, ScenarioKey};
