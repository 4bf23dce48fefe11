//! Shared types for the cell/gene quality-control workspace.
//!
//! This crate owns the identifier spaces (cells and genes), the axis index
//! used to resolve identifiers to matrix positions, the tagged selectors
//! used for row/column subsetting, the typed error kinds surfaced by every
//! filtering operation, and the external per-cell annotation table.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

pub mod annotation;
pub mod error;
pub mod index;
pub mod selector;

pub use annotation::CellAnnotations;
pub use error::{Axis, QcError};
pub use index::AxisIndex;
pub use selector::AxisSelector;

/// A deterministic, fast hash map keyed by identifiers.
pub type IdHashMap<K, V> = fxhash::FxHashMap<K, V>;

/// A deterministic, fast hash set of identifiers.
pub type IdHashSet<K> = fxhash::FxHashSet<K>;

/// The identifier of one sequenced cell (one row of the count matrix).
/// `AAACATACAACCAC-1` for example.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub String);

/// The identifier of one gene (one column of the count matrix).
/// `ENSG00000243485` for example.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneId(pub String);

impl Display for CellId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Display for GeneId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(s: &str) -> Self {
        CellId(s.to_string())
    }
}

impl From<&str> for GeneId {
    fn from(s: &str) -> Self {
        GeneId(s.to_string())
    }
}

impl AsRef<str> for CellId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for GeneId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The definition of one gene: its stable identifier plus a display name.
/// `MIR1302-2HG` for example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneDef {
    pub id: GeneId,
    pub name: String,
}

impl GeneDef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        GeneDef {
            id: GeneId(id.into()),
            name: name.into(),
        }
    }

    /// Whether this gene is of mitochondrial origin, by the `MT-`/`mt-`
    /// naming convention used in the human and mouse references.
    pub fn is_mitochondrial(&self) -> bool {
        self.name.starts_with("MT-") || self.name.starts_with("mt-")
    }
}
