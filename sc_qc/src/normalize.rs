//! Count normalization.
//!
//! Scales every cell's counts to a common target sum so that totals are
//! comparable across cells, optionally followed by `ln(1 + x)`. This is the
//! explicit transition from integer counts to floating-point values; the
//! result shares the sparse structure of its source matrix but owns its own
//! axes and data.

use log::info;
use sc_matrix::CountMatrix;
use sc_types::{AxisIndex, CellId, GeneId, QcError};

/// Parameters for [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeParams {
    /// Per-cell target sum. When `None`, the median of the nonzero per-cell
    /// totals is used.
    pub target_sum: Option<f64>,
    /// Apply `ln(1 + x)` after scaling.
    pub log1p: bool,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        NormalizeParams {
            target_sum: None,
            log1p: true,
        }
    }
}

/// A cell/gene matrix of normalized expression values.
///
/// Same cell-major sparse layout as [`CountMatrix`], with `f64` values.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMatrix {
    values: Vec<f64>,
    gene_indices: Vec<u32>,
    cell_offsets: Vec<i64>,
    cells: AxisIndex<CellId>,
    genes: AxisIndex<GeneId>,
}

impl NormalizedMatrix {
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn cells(&self) -> &AxisIndex<CellId> {
        &self.cells
    }

    pub fn genes(&self) -> &AxisIndex<GeneId> {
        &self.genes
    }

    /// Iterate the nonzero (gene position, value) pairs of one cell.
    pub fn cell_values(&self, cell: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.cell_offsets[cell] as usize..self.cell_offsets[cell + 1] as usize;
        range.map(move |i| (self.gene_indices[i] as usize, self.values[i]))
    }
}

/// Scale each cell to the target sum, then optionally `ln(1 + x)`.
///
/// Cells with zero total count stay all-zero. Fails with
/// [`QcError::UndefinedMetric`] when no target sum is given and every cell
/// has zero total count, or when the given target is not positive.
pub fn normalize(
    matrix: &CountMatrix,
    params: &NormalizeParams,
) -> Result<NormalizedMatrix, QcError> {
    let totals: Vec<i64> = (0..matrix.num_cells())
        .map(|cell| {
            matrix
                .cell_counts(cell)
                .map(|(_, count)| i64::from(count))
                .sum()
        })
        .collect();

    let target = match params.target_sum {
        Some(target) if target > 0.0 => target,
        Some(target) => {
            return Err(QcError::UndefinedMetric {
                metric: "normalization target sum".to_string(),
                reason: format!("target sum {target} is not positive"),
            });
        }
        None => median_nonzero(&totals).ok_or_else(|| QcError::UndefinedMetric {
            metric: "normalization target sum".to_string(),
            reason: "every cell has zero total count".to_string(),
        })?,
    };
    info!(
        "normalizing {} cells to target sum {target}{}",
        matrix.num_cells(),
        if params.log1p { " with log1p" } else { "" },
    );

    let (cell_offsets, gene_indices, counts) = matrix.csr_parts();
    let mut values = Vec::with_capacity(counts.len());
    for cell in 0..matrix.num_cells() {
        let scale = if totals[cell] == 0 {
            0.0
        } else {
            target / totals[cell] as f64
        };
        for i in cell_offsets[cell] as usize..cell_offsets[cell + 1] as usize {
            let scaled = f64::from(counts[i]) * scale;
            values.push(if params.log1p { scaled.ln_1p() } else { scaled });
        }
    }

    Ok(NormalizedMatrix {
        values,
        gene_indices: gene_indices.to_vec(),
        cell_offsets: cell_offsets.to_vec(),
        cells: matrix.cells().clone(),
        genes: matrix.genes().clone(),
    })
}

/// Median of the nonzero totals, or None if there are none.
fn median_nonzero(totals: &[i64]) -> Option<f64> {
    let mut nonzero: Vec<i64> = totals.iter().copied().filter(|&t| t > 0).collect();
    if nonzero.is_empty() {
        return None;
    }
    nonzero.sort_unstable();
    let mid = nonzero.len() / 2;
    Some(if nonzero.len() % 2 == 1 {
        nonzero[mid] as f64
    } else {
        (nonzero[mid - 1] + nonzero[mid]) as f64 / 2.0
    })
}
