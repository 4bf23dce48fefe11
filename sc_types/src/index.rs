//! A data structure to assist with looking up the numeric position of an
//! identifier on one axis of the count matrix.

use crate::error::{Axis, QcError};
use crate::{IdHashMap, IdHashSet};
use std::hash::Hash;

/// An ordered set of unique identifiers with by-identifier position lookup.
///
/// The order of identifiers is the order of the matrix axis they describe.
/// Construction fails if any identifier appears twice; uniqueness within an
/// axis is an invariant of every matrix in this workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisIndex<T: Eq + Hash> {
    ids: Vec<T>,
    positions: IdHashMap<T, usize>,
    axis: Axis,
}

impl<T: Clone + Eq + Hash + ToString> AxisIndex<T> {
    /// Construct an index from identifiers in axis order.
    pub fn new(ids: Vec<T>, axis: Axis) -> Result<Self, QcError> {
        let mut positions = IdHashMap::default();
        positions.reserve(ids.len());
        for (position, id) in ids.iter().enumerate() {
            if positions.insert(id.clone(), position).is_some() {
                return Err(QcError::DuplicateId {
                    axis,
                    id: id.to_string(),
                });
            }
        }
        Ok(AxisIndex {
            ids,
            positions,
            axis,
        })
    }

    /// Return the numeric position of the given identifier, if present.
    pub fn get(&self, id: &T) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Whether the given identifier is present on this axis.
    pub fn contains(&self, id: &T) -> bool {
        self.positions.contains_key(id)
    }

    /// The identifiers in axis order.
    pub fn ids(&self) -> &[T] {
        &self.ids
    }

    /// The axis this index describes.
    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Return an indicator vector for a set of identifiers: entry `i` is true
    /// iff `ids()[i]` is in the set. Identifiers in the set but absent from
    /// this axis are not flagged here; callers that must treat them as an
    /// error use [`crate::AxisSelector::ByIdentifierSet`] instead.
    pub fn indicator_vec(&self, set: &IdHashSet<T>) -> Vec<bool> {
        self.ids.iter().map(|id| set.contains(id)).collect()
    }

    /// Build a new index retaining the identifiers at the given positions,
    /// in the given order. Positions must be in bounds.
    pub fn select(&self, keep: &[usize]) -> AxisIndex<T> {
        let ids: Vec<T> = keep.iter().map(|&i| self.ids[i].clone()).collect();
        // Uniqueness is preserved by any subset of a unique id list.
        AxisIndex::new(ids, self.axis).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CellId;
    use pretty_assertions::assert_eq;

    fn cid(s: &str) -> CellId {
        CellId::from(s)
    }

    #[test]
    fn test_lookup_in_axis_order() {
        let index =
            AxisIndex::new(vec![cid("c1"), cid("c2"), cid("c3")], Axis::Cells).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.get(&cid("c2")), Some(1));
        assert_eq!(index.get(&cid("c4")), None);
        assert!(index.contains(&cid("c3")));
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let err = AxisIndex::new(vec![cid("c1"), cid("c2"), cid("c1")], Axis::Cells)
            .unwrap_err();
        assert!(matches!(
            err,
            QcError::DuplicateId { axis: Axis::Cells, ref id } if id == "c1"
        ));
    }

    #[test]
    fn test_indicator_vec_ignores_foreign_ids() {
        let index =
            AxisIndex::new(vec![cid("a"), cid("g"), cid("t")], Axis::Cells).unwrap();
        let set: crate::IdHashSet<CellId> =
            [cid("g"), cid("a"), cid("c")].into_iter().collect();
        assert_eq!(index.indicator_vec(&set), vec![true, true, false]);
    }

    #[test]
    fn test_select_preserves_order() {
        let index =
            AxisIndex::new(vec![cid("c1"), cid("c2"), cid("c3")], Axis::Cells).unwrap();
        let subset = index.select(&[0, 2]);
        assert_eq!(subset.ids(), &[cid("c1"), cid("c3")]);
        assert_eq!(subset.get(&cid("c3")), Some(1));
    }
}
