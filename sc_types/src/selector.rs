//! Tagged row/column selectors.
//!
//! Dynamic selection by mixed identifier/index/boolean is represented as an
//! explicit variant per addressing mode, resolved to a concrete index set
//! before any subsetting takes place.

use crate::error::QcError;
use crate::index::AxisIndex;
use crate::IdHashSet;
use itertools::Itertools;
use std::hash::Hash;
use std::ops::Range;

/// Selects a subset of one matrix axis.
#[derive(Debug, Clone)]
pub enum AxisSelector<T> {
    /// Select by identifier. Every identifier must exist on the axis.
    ByIdentifierSet(IdHashSet<T>),
    /// Select a contiguous range of axis positions.
    ByIndexRange(Range<usize>),
    /// Select by a boolean mask with one entry per axis position.
    ByBooleanMask(Vec<bool>),
}

impl<T: Clone + Eq + Hash + ToString> AxisSelector<T> {
    /// Resolve this selector against an axis into a sorted set of concrete
    /// positions. Identifier misses, mask length mismatches and
    /// out-of-bounds ranges are errors, never silently dropped.
    pub fn resolve(&self, index: &AxisIndex<T>) -> Result<Vec<usize>, QcError> {
        match self {
            AxisSelector::ByIdentifierSet(ids) => {
                let missing: Vec<String> = ids
                    .iter()
                    .filter(|id| !index.contains(id))
                    .map(ToString::to_string)
                    .sorted()
                    .collect();
                if !missing.is_empty() {
                    return Err(QcError::ShapeMismatch(format!(
                        "{} selector names {} identifier(s) absent from the matrix: {}",
                        index.axis(),
                        missing.len(),
                        missing.iter().take(5).join(", "),
                    )));
                }
                Ok(ids
                    .iter()
                    .map(|id| index.get(id).unwrap())
                    .sorted()
                    .collect())
            }
            AxisSelector::ByIndexRange(range) => {
                if range.end > index.len() {
                    return Err(QcError::SelectorOutOfBounds {
                        start: range.start,
                        end: range.end,
                        len: index.len(),
                        axis: index.axis(),
                    });
                }
                Ok(range.clone().collect())
            }
            AxisSelector::ByBooleanMask(mask) => {
                if mask.len() != index.len() {
                    return Err(QcError::ShapeMismatch(format!(
                        "boolean mask of length {} applied to {} {}",
                        mask.len(),
                        index.len(),
                        index.axis(),
                    )));
                }
                Ok(mask
                    .iter()
                    .enumerate()
                    .filter_map(|(i, &keep)| keep.then_some(i))
                    .collect())
            }
        }
    }
}
