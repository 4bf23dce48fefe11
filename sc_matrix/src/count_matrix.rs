//! A cell/gene count matrix.
//!
//! Storage is compressed sparse row with cells as the major axis: a flat
//! array of nonzero counts, the gene index of each count, and one offset per
//! cell marking where its counts begin. Matrices are immutable once built;
//! every filter or subset operation returns a new owned matrix.

use itertools::Itertools;
use sc_types::{Axis, AxisIndex, AxisSelector, CellId, GeneDef, GeneId, QcError};
use std::mem::size_of;
use std::ops::Range;

/// The number of molecules observed for a particular (cell, gene) pair.
pub type Count = u32;
/// The index into the gene axis for a particular count.
type GeneIdx = u32;
/// Offset into the count array where a cell's count range begins.
type CellCountOffset = i64;

/// In-memory representation of the count matrix.
///
/// Rows are cells, columns are genes; values are raw molecule counts.
/// Identifiers are unique within each axis, enforced at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    counts: Vec<Count>,
    gene_indices: Vec<GeneIdx>,
    cell_offsets: Vec<CellCountOffset>,
    cells: AxisIndex<CellId>,
    gene_defs: Vec<GeneDef>,
    genes: AxisIndex<GeneId>,
}

impl CountMatrix {
    /// Build a matrix from (cell position, gene position, count) triplets.
    ///
    /// Triplets may arrive in any order; duplicates for the same pair are
    /// summed and zero counts are dropped. Positions must be in bounds for
    /// the provided axes.
    pub fn from_triplets(
        cells: Vec<CellId>,
        genes: Vec<GeneDef>,
        triplets: impl IntoIterator<Item = (usize, usize, Count)>,
    ) -> Result<CountMatrix, QcError> {
        let cells = AxisIndex::new(cells, Axis::Cells)?;
        let gene_ids: Vec<GeneId> = genes.iter().map(|def| def.id.clone()).collect();
        let gene_index = AxisIndex::new(gene_ids, Axis::Genes)?;

        let mut entries: Vec<(usize, usize, Count)> = Vec::new();
        for (cell, gene, count) in triplets {
            if cell >= cells.len() || gene >= genes.len() {
                return Err(QcError::ShapeMismatch(format!(
                    "count entry at (cell {cell}, gene {gene}) is out of bounds \
                     for a {} x {} matrix",
                    cells.len(),
                    genes.len(),
                )));
            }
            if count > 0 {
                entries.push((cell, gene, count));
            }
        }
        entries.sort_unstable_by_key(|&(cell, gene, _)| (cell, gene));

        let mut counts = Vec::with_capacity(entries.len());
        let mut gene_indices = Vec::with_capacity(entries.len());
        let mut cell_offsets = Vec::with_capacity(cells.len() + 1);
        cell_offsets.push(0);
        let mut current_cell = 0;
        for ((cell, gene), group) in &entries.iter().group_by(|&&(cell, gene, _)| (cell, gene)) {
            while current_cell < cell {
                cell_offsets.push(counts.len() as CellCountOffset);
                current_cell += 1;
            }
            // Widen before summing; repeated near-max entries for one pair
            // must not wrap in release builds.
            let total: u64 = group.map(|&(_, _, count)| u64::from(count)).sum();
            counts.push(
                Count::try_from(total).map_err(|_| QcError::CountOverflow { cell, gene })?,
            );
            gene_indices.push(gene as GeneIdx);
        }
        while cell_offsets.len() <= cells.len() {
            cell_offsets.push(counts.len() as CellCountOffset);
        }

        Ok(CountMatrix {
            counts,
            gene_indices,
            cell_offsets,
            cells,
            gene_defs: genes,
            genes: gene_index,
        })
    }

    /// Build a matrix from one dense count row per cell. Intended for small
    /// matrices; the sparse triplet constructor is the real entry point.
    pub fn from_dense(
        cells: Vec<CellId>,
        genes: Vec<GeneDef>,
        rows: &[Vec<Count>],
    ) -> Result<CountMatrix, QcError> {
        if rows.len() != cells.len() || rows.iter().any(|row| row.len() != genes.len()) {
            return Err(QcError::ShapeMismatch(format!(
                "dense rows do not form a {} x {} matrix",
                cells.len(),
                genes.len(),
            )));
        }
        let triplets = rows.iter().enumerate().flat_map(|(cell, row)| {
            row.iter()
                .enumerate()
                .map(move |(gene, &count)| (cell, gene, count))
        });
        // Collect first: from_triplets borrows nothing from rows after this.
        let triplets: Vec<_> = triplets.collect();
        CountMatrix::from_triplets(cells, genes, triplets)
    }

    /// The number of cells (rows).
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// The number of genes (columns).
    pub fn num_genes(&self) -> usize {
        self.gene_defs.len()
    }

    /// The number of stored nonzero counts.
    pub fn num_non_zeros(&self) -> usize {
        self.counts.len()
    }

    /// The cell axis index.
    pub fn cells(&self) -> &AxisIndex<CellId> {
        &self.cells
    }

    /// The gene axis index.
    pub fn genes(&self) -> &AxisIndex<GeneId> {
        &self.genes
    }

    /// The gene definitions, in axis order.
    pub fn gene_defs(&self) -> &[GeneDef] {
        &self.gene_defs
    }

    /// The matrix shape and occupancy.
    pub fn dimensions(&self) -> MatrixDimensions {
        MatrixDimensions {
            num_cells: self.num_cells(),
            num_genes: self.num_genes(),
            num_non_zeros: self.num_non_zeros(),
        }
    }

    /// The raw sparse storage: per-cell offsets, gene indices, counts.
    pub fn csr_parts(&self) -> (&[i64], &[u32], &[Count]) {
        (&self.cell_offsets, &self.gene_indices, &self.counts)
    }

    fn cell_range(&self, cell: usize) -> Range<usize> {
        self.cell_offsets[cell] as usize..self.cell_offsets[cell + 1] as usize
    }

    /// Iterate the nonzero (gene position, count) pairs of one cell.
    pub fn cell_counts(&self, cell: usize) -> impl Iterator<Item = (usize, Count)> + '_ {
        self.cell_range(cell)
            .map(move |i| (self.gene_indices[i] as usize, self.counts[i]))
    }

    /// Iterate all cells with their count ranges.
    fn iter_cell_ranges(&self) -> impl Iterator<Item = (usize, Range<usize>)> + '_ {
        self.cell_offsets
            .iter()
            .tuple_windows()
            .enumerate()
            .map(|(cell, (&start, &end))| (cell, start as usize..end as usize))
    }

    /// Iterate over all counts, including their cell and gene.
    pub fn counts(&self) -> impl Iterator<Item = AnnotatedCount<'_>> {
        self.iter_cell_ranges().flat_map(move |(cell, range)| {
            range.map(move |i| AnnotatedCount {
                count: self.counts[i],
                cell: &self.cells.ids()[cell],
                gene: &self.gene_defs[self.gene_indices[i] as usize],
            })
        })
    }

    /// Retain only the cells at the given positions, in the given order.
    /// Returns a new matrix; the input is untouched.
    pub fn select_cells(&self, keep: &[usize]) -> Result<CountMatrix, QcError> {
        self.check_in_bounds(keep, Axis::Cells)?;
        let cells = self.cells.select(keep);
        let mut counts = Vec::new();
        let mut gene_indices = Vec::new();
        let mut cell_offsets = Vec::with_capacity(keep.len() + 1);
        cell_offsets.push(0);
        for &cell in keep {
            let range = self.cell_range(cell);
            counts.extend_from_slice(&self.counts[range.clone()]);
            gene_indices.extend_from_slice(&self.gene_indices[range]);
            cell_offsets.push(counts.len() as CellCountOffset);
        }
        Ok(CountMatrix {
            counts,
            gene_indices,
            cell_offsets,
            cells,
            gene_defs: self.gene_defs.clone(),
            genes: self.genes.clone(),
        })
    }

    /// Retain only the genes at the given positions, in the given order.
    /// Returns a new matrix; the input is untouched.
    pub fn select_genes(&self, keep: &[usize]) -> Result<CountMatrix, QcError> {
        self.check_in_bounds(keep, Axis::Genes)?;
        let gene_defs: Vec<GeneDef> = keep.iter().map(|&g| self.gene_defs[g].clone()).collect();
        let genes = AxisIndex::new(
            gene_defs.iter().map(|def| def.id.clone()).collect(),
            Axis::Genes,
        )?;

        let mut remap = vec![None; self.num_genes()];
        for (new, &old) in keep.iter().enumerate() {
            remap[old] = Some(new as GeneIdx);
        }

        let mut counts = Vec::new();
        let mut gene_indices = Vec::new();
        let mut cell_offsets = Vec::with_capacity(self.num_cells() + 1);
        cell_offsets.push(0);
        for (_, range) in self.iter_cell_ranges() {
            // Entries within a row are sorted by the old gene index; a gene
            // subset preserves relative order, so rows stay sorted as long
            // as `keep` is ascending, which every filter in this workspace
            // produces.
            for i in range {
                if let Some(new_gene) = remap[self.gene_indices[i] as usize] {
                    counts.push(self.counts[i]);
                    gene_indices.push(new_gene);
                }
            }
            cell_offsets.push(counts.len() as CellCountOffset);
        }
        Ok(CountMatrix {
            counts,
            gene_indices,
            cell_offsets,
            cells: self.cells.clone(),
            gene_defs,
            genes,
        })
    }

    /// Resolve a cell selector and retain the selected cells.
    pub fn subset_cells(&self, selector: &AxisSelector<CellId>) -> Result<CountMatrix, QcError> {
        self.select_cells(&selector.resolve(&self.cells)?)
    }

    /// Resolve a gene selector and retain the selected genes.
    pub fn subset_genes(&self, selector: &AxisSelector<GeneId>) -> Result<CountMatrix, QcError> {
        self.select_genes(&selector.resolve(&self.genes)?)
    }

    fn check_in_bounds(&self, keep: &[usize], axis: Axis) -> Result<(), QcError> {
        let len = match axis {
            Axis::Cells => self.num_cells(),
            Axis::Genes => self.num_genes(),
        };
        if let Some(&out) = keep.iter().find(|&&i| i >= len) {
            return Err(QcError::SelectorOutOfBounds {
                start: out,
                end: out + 1,
                len,
                axis,
            });
        }
        Ok(())
    }
}

/// All data for one stored count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotatedCount<'a> {
    /// The molecule count.
    pub count: Count,
    /// The cell this count belongs to.
    pub cell: &'a CellId,
    /// The gene this count belongs to.
    pub gene: &'a GeneDef,
}

/// The shape and occupancy of a count matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixDimensions {
    /// Number of cells (rows).
    pub num_cells: usize,
    /// Number of genes (columns).
    pub num_genes: usize,
    /// Number of stored nonzero counts.
    pub num_non_zeros: usize,
}

impl MatrixDimensions {
    // Amount of memory in bytes required for the matrix.
    fn estimate_mem_bytes(&self) -> usize {
        size_of::<Count>() * self.num_non_zeros
            + size_of::<GeneIdx>() * self.num_non_zeros
            + size_of::<CellCountOffset>() * (1 + self.num_cells)
    }

    /// Amount of memory in GiB required for the matrix.
    pub fn estimate_mem_gib(&self) -> f64 {
        (self.estimate_mem_bytes() as f64) / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Build cell identifiers `c1..cN` and gene definitions `g1..gN`. Test
/// fixture shared by sibling crates; not part of the stable API.
#[doc(hidden)]
pub fn toy_axes(num_cells: usize, num_genes: usize) -> (Vec<CellId>, Vec<GeneDef>) {
    let cells = (1..=num_cells)
        .map(|i| CellId(format!("c{i}")))
        .collect();
    let genes = (1..=num_genes)
        .map(|i| GeneDef::new(format!("g{i}"), format!("G{i}")))
        .collect();
    (cells, genes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sc_types::IdHashSet;

    fn small_matrix() -> CountMatrix {
        let (cells, genes) = toy_axes(3, 4);
        // c1: g1=5 g3=2; c2: g2=1; c3: empty
        CountMatrix::from_triplets(
            cells,
            genes,
            vec![(0, 2, 2), (1, 1, 1), (0, 0, 5)],
        )
        .unwrap()
    }

    #[test]
    fn test_from_triplets_sorts_and_offsets() {
        let matrix = small_matrix();
        assert_eq!(matrix.num_cells(), 3);
        assert_eq!(matrix.num_genes(), 4);
        assert_eq!(matrix.num_non_zeros(), 3);
        let (offsets, gene_indices, counts) = matrix.csr_parts();
        assert_eq!(offsets, &[0, 2, 3, 3]);
        assert_eq!(gene_indices, &[0, 2, 1]);
        assert_eq!(counts, &[5, 2, 1]);
    }

    #[test]
    fn test_from_triplets_sums_duplicates_and_drops_zeros() {
        let (cells, genes) = toy_axes(2, 2);
        let matrix = CountMatrix::from_triplets(
            cells,
            genes,
            vec![(0, 0, 3), (0, 0, 4), (1, 1, 0)],
        )
        .unwrap();
        assert_eq!(matrix.num_non_zeros(), 1);
        assert_eq!(matrix.cell_counts(0).collect::<Vec<_>>(), vec![(0, 7)]);
        assert_eq!(matrix.cell_counts(1).count(), 0);
    }

    #[test]
    fn test_duplicate_sum_overflow_rejected() {
        let (cells, genes) = toy_axes(1, 1);
        let err =
            CountMatrix::from_triplets(cells, genes, vec![(0, 0, u32::MAX), (0, 0, 1)])
                .unwrap_err();
        assert!(matches!(err, QcError::CountOverflow { cell: 0, gene: 0 }));
    }

    #[test]
    fn test_dimensions_and_memory_estimate() {
        let dims = small_matrix().dimensions();
        assert_eq!(
            dims,
            MatrixDimensions {
                num_cells: 3,
                num_genes: 4,
                num_non_zeros: 3,
            }
        );
        // 3 counts and 3 gene indices at 4 bytes each, 4 offsets at 8 bytes.
        assert_eq!(dims.estimate_mem_bytes(), 56);
        assert!(dims.estimate_mem_gib() < 1e-6);
    }

    #[test]
    fn test_from_triplets_out_of_bounds() {
        let (cells, genes) = toy_axes(2, 2);
        let err =
            CountMatrix::from_triplets(cells, genes, vec![(0, 5, 1)]).unwrap_err();
        assert!(matches!(err, QcError::ShapeMismatch(_)));
    }

    #[test]
    fn test_duplicate_cell_id_rejected() {
        let (_, genes) = toy_axes(0, 2);
        let cells = vec![CellId::from("c1"), CellId::from("c1")];
        let err = CountMatrix::from_triplets(cells, genes, vec![]).unwrap_err();
        assert!(matches!(err, QcError::DuplicateId { .. }));
    }

    #[test]
    fn test_counts_iterator_covers_all_entries() {
        let matrix = small_matrix();
        let annotated: Vec<_> = matrix.counts().collect();
        assert_eq!(annotated.len(), matrix.num_non_zeros());
        assert_eq!(annotated[0].cell, &CellId::from("c1"));
        assert_eq!(annotated[0].gene.id, GeneId::from("g1"));
        assert_eq!(annotated[0].count, 5);
    }

    #[test]
    fn test_select_cells() {
        let matrix = small_matrix();
        let subset = matrix.select_cells(&[2, 0]).unwrap();
        assert_eq!(
            subset.cells().ids(),
            &[CellId::from("c3"), CellId::from("c1")]
        );
        assert_eq!(subset.cell_counts(0).count(), 0);
        assert_eq!(
            subset.cell_counts(1).collect::<Vec<_>>(),
            vec![(0, 5), (2, 2)]
        );
        // Original untouched.
        assert_eq!(matrix.num_cells(), 3);
    }

    #[test]
    fn test_select_genes_remaps_indices() {
        let matrix = small_matrix();
        let subset = matrix.select_genes(&[1, 2]).unwrap();
        assert_eq!(subset.num_genes(), 2);
        assert_eq!(subset.cell_counts(0).collect::<Vec<_>>(), vec![(1, 2)]);
        assert_eq!(subset.cell_counts(1).collect::<Vec<_>>(), vec![(0, 1)]);
    }

    #[test]
    fn test_subset_by_identifier_selector() {
        let matrix = small_matrix();
        let set: IdHashSet<GeneId> =
            [GeneId::from("g1"), GeneId::from("g3")].into_iter().collect();
        let subset = matrix
            .subset_genes(&AxisSelector::ByIdentifierSet(set))
            .unwrap();
        assert_eq!(
            subset.genes().ids(),
            &[GeneId::from("g1"), GeneId::from("g3")]
        );
        assert_eq!(subset.cell_counts(0).collect::<Vec<_>>(), vec![(0, 5), (1, 2)]);
    }

    #[test]
    fn test_select_out_of_bounds() {
        let matrix = small_matrix();
        assert!(matches!(
            matrix.select_cells(&[7]).unwrap_err(),
            QcError::SelectorOutOfBounds { .. }
        ));
    }

    #[test]
    fn test_from_dense_matches_triplets() {
        let (cells, genes) = toy_axes(3, 4);
        let dense = CountMatrix::from_dense(
            cells,
            genes,
            &[
                vec![5, 0, 2, 0],
                vec![0, 1, 0, 0],
                vec![0, 0, 0, 0],
            ],
        )
        .unwrap();
        assert_eq!(dense, small_matrix());
    }
}
