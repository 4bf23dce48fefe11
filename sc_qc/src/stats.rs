//! Per-cell and per-gene summary statistics.
//!
//! Summaries are derived from a specific matrix and are never persisted
//! independently of it: each vector here is aligned with the axis order of
//! the matrix it was computed from, and is recomputed whenever the matrix
//! changes.

use sc_matrix::CountMatrix;
use sc_types::QcError;
use serde::Serialize;

/// Quality metrics for every cell of one matrix, in cell axis order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellStats {
    /// Sum of counts in the cell's row.
    pub total_counts: Vec<i64>,
    /// Number of genes with a nonzero count in the cell's row.
    pub genes_detected: Vec<u32>,
    /// Fraction of the cell's counts attributable to mitochondrial genes,
    /// once computed. Defined as 0 for a cell with zero total count.
    pub mito_fraction: Option<Vec<f64>>,
}

impl CellStats {
    /// Compute per-cell totals and detected-gene counts.
    ///
    /// Fails on a matrix with zero genes, where a row total is undefined.
    pub fn compute(matrix: &CountMatrix) -> Result<CellStats, QcError> {
        if matrix.num_genes() == 0 {
            return Err(QcError::UndefinedMetric {
                metric: "per-cell total count".to_string(),
                reason: "the matrix has no genes".to_string(),
            });
        }
        let mut total_counts = Vec::with_capacity(matrix.num_cells());
        let mut genes_detected = Vec::with_capacity(matrix.num_cells());
        for cell in 0..matrix.num_cells() {
            let mut total = 0i64;
            let mut detected = 0u32;
            for (_, count) in matrix.cell_counts(cell) {
                total += i64::from(count);
                detected += 1;
            }
            total_counts.push(total);
            genes_detected.push(detected);
        }
        Ok(CellStats {
            total_counts,
            genes_detected,
            mito_fraction: None,
        })
    }

    /// The number of cells described.
    pub fn len(&self) -> usize {
        self.total_counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_counts.is_empty()
    }

    /// Restrict these stats to the cells at the given positions, preserving
    /// alignment with a matrix produced by the same selection.
    pub fn select(&self, keep: &[usize]) -> CellStats {
        CellStats {
            total_counts: keep.iter().map(|&i| self.total_counts[i]).collect(),
            genes_detected: keep.iter().map(|&i| self.genes_detected[i]).collect(),
            mito_fraction: self
                .mito_fraction
                .as_ref()
                .map(|frac| keep.iter().map(|&i| frac[i]).collect()),
        }
    }
}

/// Quality metrics for every gene of one matrix, in gene axis order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneStats {
    /// Number of cells with a nonzero count for the gene.
    pub cells_expressing: Vec<u32>,
    /// Normalized dispersion of the gene's expression, once computed.
    pub dispersion: Option<Vec<f64>>,
    /// Whether the gene is selected for downstream analysis, once computed.
    pub selected: Option<Vec<bool>>,
}

impl GeneStats {
    /// Compute the expressing-cell count for every gene.
    pub fn compute(matrix: &CountMatrix) -> GeneStats {
        let mut cells_expressing = vec![0u32; matrix.num_genes()];
        for cell in 0..matrix.num_cells() {
            for (gene, _) in matrix.cell_counts(cell) {
                cells_expressing[gene] += 1;
            }
        }
        GeneStats {
            cells_expressing,
            dispersion: None,
            selected: None,
        }
    }

    /// The number of genes described.
    pub fn len(&self) -> usize {
        self.cells_expressing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells_expressing.is_empty()
    }

    /// Restrict these stats to the genes at the given positions.
    pub fn select(&self, keep: &[usize]) -> GeneStats {
        GeneStats {
            cells_expressing: keep.iter().map(|&i| self.cells_expressing[i]).collect(),
            dispersion: self
                .dispersion
                .as_ref()
                .map(|d| keep.iter().map(|&i| d[i]).collect()),
            selected: self
                .selected
                .as_ref()
                .map(|s| keep.iter().map(|&i| s[i]).collect()),
        }
    }
}
