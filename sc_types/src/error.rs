//! Error kinds surfaced by filtering and merge operations.
//!
//! All operations over the count matrix are deterministic pure functions, so
//! no error here is transient and none is retried. Each kind is surfaced to
//! the caller immediately rather than coerced into a partial or empty result.

use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// One of the two axes of the count matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Cells,
    Genes,
}

impl Display for Axis {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::Cells => "cells",
            Axis::Genes => "genes",
        })
    }
}

/// Errors produced by matrix construction, selection, filtering and merging.
#[derive(Debug, Error)]
pub enum QcError {
    /// The identifier sets of two inputs being merged or compared are
    /// incompatible.
    #[error("identifier spaces do not align: {0}")]
    ShapeMismatch(String),

    /// A filter step would remove every row or every column.
    #[error("{filter} would remove all {axis}; loosen the thresholds")]
    DegenerateResult { filter: String, axis: Axis },

    /// A per-cell metric was requested when its denominator is undefined.
    #[error("{metric} is undefined: {reason}")]
    UndefinedMetric { metric: String, reason: String },

    /// An identifier appeared more than once on one axis.
    #[error("duplicate {axis} identifier {id:?}")]
    DuplicateId { axis: Axis, id: String },

    /// Summing duplicate entries for one (cell, gene) pair exceeded the
    /// count value range.
    #[error("summed count at (cell {cell}, gene {gene}) exceeds the count range")]
    CountOverflow { cell: usize, gene: usize },

    /// An index-range selector reached past the end of its axis.
    #[error("selector range {start}..{end} out of bounds for {len} {axis}")]
    SelectorOutOfBounds {
        start: usize,
        end: usize,
        len: usize,
        axis: Axis,
    },
}

impl QcError {
    /// Construct a [`QcError::DegenerateResult`] for the named filter step.
    pub fn degenerate(filter: impl Into<String>, axis: Axis) -> Self {
        QcError::DegenerateResult {
            filter: filter.into(),
            axis,
        }
    }
}
