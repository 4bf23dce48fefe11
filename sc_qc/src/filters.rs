//! Cell and gene filtering.
//!
//! Each filter consumes a matrix by reference and returns a new owned matrix
//! plus the statistics that justified the decision, restricted to the
//! survivors. Thresholds of 0 are a no-op that still populates statistics.

use crate::stats::{CellStats, GeneStats};
use log::info;
use sc_matrix::CountMatrix;
use sc_types::{Axis, AxisSelector, GeneId, QcError};

/// Combined per-cell retention thresholds.
///
/// Both thresholds are applied as a single predicate over statistics
/// computed from the input matrix, not as two sequential narrowing passes
/// with stale statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellFilter {
    /// Minimum number of genes detected in a retained cell.
    pub min_genes: u32,
    /// Minimum total count of a retained cell.
    pub min_counts: i64,
}

/// Retain cells detecting at least `min_genes` genes AND totalling at least
/// `min_counts` counts. Returns the filtered matrix with its per-cell stats.
pub fn filter_cells(
    matrix: &CountMatrix,
    filter: &CellFilter,
) -> Result<(CountMatrix, CellStats), QcError> {
    let stats = CellStats::compute(matrix)?;
    let keep: Vec<usize> = (0..matrix.num_cells())
        .filter(|&cell| {
            stats.genes_detected[cell] >= filter.min_genes
                && stats.total_counts[cell] >= filter.min_counts
        })
        .collect();
    if keep.is_empty() {
        return Err(QcError::degenerate(
            format!(
                "cell filter (min_genes={}, min_counts={})",
                filter.min_genes, filter.min_counts
            ),
            Axis::Cells,
        ));
    }
    info!(
        "cell filter retained {}/{} cells (min_genes={}, min_counts={})",
        keep.len(),
        matrix.num_cells(),
        filter.min_genes,
        filter.min_counts,
    );
    Ok((matrix.select_cells(&keep)?, stats.select(&keep)))
}

/// Retain genes expressed in at least `min_cells` cells. Returns the
/// filtered matrix with its per-gene stats.
pub fn filter_genes(
    matrix: &CountMatrix,
    min_cells: u32,
) -> Result<(CountMatrix, GeneStats), QcError> {
    let stats = GeneStats::compute(matrix);
    let keep: Vec<usize> = (0..matrix.num_genes())
        .filter(|&gene| stats.cells_expressing[gene] >= min_cells)
        .collect();
    if keep.is_empty() {
        return Err(QcError::degenerate(
            format!("gene filter (min_cells={min_cells})"),
            Axis::Genes,
        ));
    }
    info!(
        "gene filter retained {}/{} genes (min_cells={min_cells})",
        keep.len(),
        matrix.num_genes(),
    );
    Ok((matrix.select_genes(&keep)?, stats.select(&keep)))
}

/// Remove genes with no nonzero count across all retained cells.
pub fn drop_zero_expression_genes(
    matrix: &CountMatrix,
) -> Result<(CountMatrix, GeneStats), QcError> {
    filter_genes(matrix, 1)
}

/// A boolean-mask selector flagging genes named with the `MT-`/`mt-`
/// mitochondrial prefix.
pub fn mitochondrial_gene_selector(matrix: &CountMatrix) -> AxisSelector<GeneId> {
    AxisSelector::ByBooleanMask(
        matrix
            .gene_defs()
            .iter()
            .map(|def| def.is_mitochondrial())
            .collect(),
    )
}

/// Compute, for every cell, the fraction of its total count attributable to
/// the selected mitochondrial genes.
///
/// `stats` must describe `matrix`; the fraction for a cell with zero total
/// count is defined as 0 rather than propagating an undefined value.
pub fn mito_fraction(
    matrix: &CountMatrix,
    stats: &CellStats,
    mito_genes: &AxisSelector<GeneId>,
) -> Result<Vec<f64>, QcError> {
    if stats.len() != matrix.num_cells() {
        return Err(QcError::ShapeMismatch(format!(
            "per-cell stats describe {} cells but the matrix has {}",
            stats.len(),
            matrix.num_cells(),
        )));
    }
    let mito_positions = mito_genes.resolve(matrix.genes())?;
    let mut is_mito = vec![false; matrix.num_genes()];
    for position in mito_positions {
        is_mito[position] = true;
    }

    let fractions = (0..matrix.num_cells())
        .map(|cell| {
            let total = stats.total_counts[cell];
            if total == 0 {
                return 0.0;
            }
            let mito_total: i64 = matrix
                .cell_counts(cell)
                .filter(|&(gene, _)| is_mito[gene])
                .map(|(_, count)| i64::from(count))
                .sum();
            mito_total as f64 / total as f64
        })
        .collect();
    Ok(fractions)
}

/// Drop cells whose mitochondrial fraction exceeds `max_fraction`. Returns
/// the filtered matrix and the fractions of the surviving cells.
pub fn filter_by_mito_fraction(
    matrix: &CountMatrix,
    fractions: &[f64],
    max_fraction: f64,
) -> Result<(CountMatrix, Vec<f64>), QcError> {
    if fractions.len() != matrix.num_cells() {
        return Err(QcError::ShapeMismatch(format!(
            "{} mitochondrial fractions supplied for {} cells",
            fractions.len(),
            matrix.num_cells(),
        )));
    }
    let keep: Vec<usize> = (0..matrix.num_cells())
        .filter(|&cell| fractions[cell] <= max_fraction)
        .collect();
    if keep.is_empty() {
        return Err(QcError::degenerate(
            format!("mitochondrial filter (max_fraction={max_fraction})"),
            Axis::Cells,
        ));
    }
    info!(
        "mitochondrial filter retained {}/{} cells (max_fraction={max_fraction})",
        keep.len(),
        matrix.num_cells(),
    );
    let kept_fractions = keep.iter().map(|&cell| fractions[cell]).collect();
    Ok((matrix.select_cells(&keep)?, kept_fractions))
}
