//! The end-to-end QC pipeline.
//!
//! Chains the individual steps in a fixed order: validate annotations
//! against the raw matrix, filter cells on detected genes and total counts,
//! drop high-mitochondrial cells, filter under-expressed genes, recompute
//! final statistics, normalize, and flag highly variable genes. Every
//! intermediate matrix is a new value; the input is never mutated.

use crate::filters::{
    filter_by_mito_fraction, filter_cells, filter_genes, mito_fraction,
    mitochondrial_gene_selector, CellFilter,
};
use crate::hvg::{remove_gene_subset_from_selection, select_highly_variable, HvgParams};
use crate::normalize::{normalize, NormalizeParams, NormalizedMatrix};
use crate::stats::{CellStats, GeneStats};
use log::info;
use sc_matrix::CountMatrix;
use sc_types::{CellAnnotations, GeneId, IdHashSet, QcError};
use serde::Serialize;

/// Thresholds and options for one [`run_qc`] invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct QcParams {
    /// Combined per-cell retention thresholds.
    pub cell_filter: CellFilter,
    /// Maximum tolerated mitochondrial fraction per cell.
    pub max_mito_fraction: f64,
    /// Minimum number of expressing cells for a retained gene.
    pub min_cells_per_gene: u32,
    /// Normalization applied before variability scoring.
    pub normalize: NormalizeParams,
    /// Highly-variable-gene cutoffs.
    pub hvg: HvgParams,
    /// Genes cleared from the selection flags after scoring.
    pub exclude_from_selection: IdHashSet<GeneId>,
}

impl Default for QcParams {
    fn default() -> Self {
        QcParams {
            cell_filter: CellFilter {
                min_genes: 200,
                min_counts: 0,
            },
            max_mito_fraction: 0.1,
            min_cells_per_gene: 3,
            normalize: NormalizeParams::default(),
            hvg: HvgParams::default(),
            exclude_from_selection: IdHashSet::default(),
        }
    }
}

/// Matrix dimensions at one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepDims {
    pub cells: usize,
    pub genes: usize,
}

impl StepDims {
    fn of(matrix: &CountMatrix) -> StepDims {
        StepDims {
            cells: matrix.num_cells(),
            genes: matrix.num_genes(),
        }
    }
}

/// What each step did, for the run report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QcSummary {
    /// Dimensions of the input matrix.
    pub input: StepDims,
    /// Dimensions after the combined cell filter.
    pub after_cell_filter: StepDims,
    /// Dimensions after the mitochondrial-fraction filter.
    pub after_mito_filter: StepDims,
    /// Dimensions after the gene filter.
    pub after_gene_filter: StepDims,
    /// Genes flagged highly variable, after exclusions.
    pub highly_variable_genes: usize,
    /// Selection flags cleared by the exclusion set.
    pub excluded_from_selection: usize,
}

/// Everything a QC run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct QcOutcome {
    /// The filtered count matrix.
    pub matrix: CountMatrix,
    /// Per-cell statistics of the filtered matrix, mitochondrial fraction
    /// included.
    pub cell_stats: CellStats,
    /// Per-gene statistics of the filtered matrix, dispersion and selection
    /// flags included.
    pub gene_stats: GeneStats,
    /// Normalized expression over the filtered matrix.
    pub normalized: NormalizedMatrix,
    /// The annotation table restricted to surviving cells, when one was
    /// supplied.
    pub annotations: Option<CellAnnotations>,
    /// Step-by-step run report.
    pub summary: QcSummary,
}

/// Run the full QC pipeline over one matrix.
///
/// A supplied annotation table is validated against the raw matrix before
/// any filtering, so a mismatched table fails the run rather than silently
/// shrinking with it.
pub fn run_qc(
    matrix: &CountMatrix,
    annotations: Option<&CellAnnotations>,
    params: &QcParams,
) -> Result<QcOutcome, QcError> {
    let input = StepDims::of(matrix);
    info!("running QC on {} cells x {} genes", input.cells, input.genes);
    if let Some(annotations) = annotations {
        annotations.merge(matrix.cells())?;
    }

    let (matrix, cell_stats) = filter_cells(matrix, &params.cell_filter)?;
    let after_cell_filter = StepDims::of(&matrix);

    let fractions = mito_fraction(&matrix, &cell_stats, &mitochondrial_gene_selector(&matrix))?;
    let (matrix, _) = filter_by_mito_fraction(&matrix, &fractions, params.max_mito_fraction)?;
    let after_mito_filter = StepDims::of(&matrix);

    let (matrix, _) = filter_genes(&matrix, params.min_cells_per_gene)?;
    let after_gene_filter = StepDims::of(&matrix);

    // Final statistics describe the surviving matrix, not any intermediate.
    let mut cell_stats = CellStats::compute(&matrix)?;
    cell_stats.mito_fraction = Some(mito_fraction(
        &matrix,
        &cell_stats,
        &mitochondrial_gene_selector(&matrix),
    )?);
    let mut gene_stats = GeneStats::compute(&matrix);

    let normalized = normalize(&matrix, &params.normalize)?;
    let hvg = select_highly_variable(&normalized, &params.hvg)?;
    let mut selected = hvg.selected;
    let excluded_from_selection = remove_gene_subset_from_selection(
        &mut selected,
        matrix.genes(),
        &params.exclude_from_selection,
    )?;
    let highly_variable_genes = selected.iter().filter(|&&s| s).count();
    gene_stats.dispersion = Some(hvg.normalized_dispersions);
    gene_stats.selected = Some(selected);

    let annotations = annotations
        .map(|annotations| annotations.subset(matrix.cells()))
        .transpose()?;

    let summary = QcSummary {
        input,
        after_cell_filter,
        after_mito_filter,
        after_gene_filter,
        highly_variable_genes,
        excluded_from_selection,
    };
    info!(
        "QC retained {}/{} cells and {}/{} genes",
        after_gene_filter.cells, input.cells, after_gene_filter.genes, input.genes,
    );

    Ok(QcOutcome {
        matrix,
        cell_stats,
        gene_stats,
        normalized,
        annotations,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sc_types::{CellId, GeneDef};

    /// g1 is mitochondrial. c2 is mostly mitochondrial, c3 has a low total,
    /// and g4 is expressed in a single surviving cell.
    fn scenario_matrix() -> CountMatrix {
        let cells = vec![
            CellId::from("c1"),
            CellId::from("c2"),
            CellId::from("c3"),
            CellId::from("c4"),
        ];
        let genes = vec![
            GeneDef::new("g1", "MT-ND1"),
            GeneDef::new("g2", "ACTB"),
            GeneDef::new("g3", "GAPDH"),
            GeneDef::new("g4", "XIST"),
        ];
        CountMatrix::from_dense(
            cells,
            genes,
            &[
                vec![1, 10, 10, 0],
                vec![30, 5, 5, 0],
                vec![0, 8, 0, 0],
                vec![2, 9, 9, 1],
            ],
        )
        .unwrap()
    }

    fn scenario_params() -> QcParams {
        QcParams {
            cell_filter: CellFilter {
                min_genes: 2,
                min_counts: 10,
            },
            max_mito_fraction: 0.2,
            min_cells_per_gene: 2,
            normalize: NormalizeParams {
                target_sum: Some(100.0),
                log1p: false,
            },
            // Select every gene with any expression.
            hvg: HvgParams {
                n_bins: 1,
                min_mean: 0.0,
                max_mean: 1e9,
                min_disp: -100.0,
            },
            exclude_from_selection: [GeneId::from("g2")].into_iter().collect(),
        }
    }

    fn scenario_annotations() -> CellAnnotations {
        CellAnnotations::from_rows(
            vec!["cluster".to_string()],
            [
                (CellId::from("c1"), vec!["A".to_string()]),
                (CellId::from("c2"), vec!["B".to_string()]),
                (CellId::from("c3"), vec!["A".to_string()]),
                (CellId::from("c4"), vec!["B".to_string()]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_pipeline_step_dimensions() {
        let outcome = run_qc(
            &scenario_matrix(),
            Some(&scenario_annotations()),
            &scenario_params(),
        )
        .unwrap();
        // c3 falls to the cell filter, c2 to the mitochondrial filter,
        // g4 to the gene filter.
        assert_eq!(outcome.summary.input, StepDims { cells: 4, genes: 4 });
        assert_eq!(
            outcome.summary.after_cell_filter,
            StepDims { cells: 3, genes: 4 }
        );
        assert_eq!(
            outcome.summary.after_mito_filter,
            StepDims { cells: 2, genes: 4 }
        );
        assert_eq!(
            outcome.summary.after_gene_filter,
            StepDims { cells: 2, genes: 3 }
        );
        assert!(outcome.matrix.cells().contains(&CellId::from("c1")));
        assert!(outcome.matrix.cells().contains(&CellId::from("c4")));
        assert!(!outcome.matrix.genes().contains(&GeneId::from("g4")));
    }

    #[test]
    fn test_pipeline_final_stats_describe_final_matrix() {
        let outcome = run_qc(&scenario_matrix(), None, &scenario_params()).unwrap();
        assert_eq!(outcome.cell_stats.len(), 2);
        // c1 keeps counts [1, 10, 10], c4 keeps [2, 9, 9].
        assert_eq!(outcome.cell_stats.total_counts, vec![21, 20]);
        assert_eq!(
            outcome.cell_stats.mito_fraction,
            Some(vec![1.0 / 21.0, 2.0 / 20.0])
        );
        assert_eq!(outcome.gene_stats.cells_expressing, vec![2, 2, 2]);
        assert_eq!(outcome.normalized.num_cells(), 2);
        assert_eq!(outcome.normalized.num_genes(), 3);
    }

    #[test]
    fn test_pipeline_exclusion_clears_selection_flags() {
        let outcome = run_qc(&scenario_matrix(), None, &scenario_params()).unwrap();
        // All three surviving genes are selected, then g2 is excluded.
        assert_eq!(
            outcome.gene_stats.selected,
            Some(vec![true, false, true])
        );
        assert_eq!(outcome.summary.excluded_from_selection, 1);
        assert_eq!(outcome.summary.highly_variable_genes, 2);
    }

    #[test]
    fn test_pipeline_subsets_annotations_to_survivors() {
        let outcome = run_qc(
            &scenario_matrix(),
            Some(&scenario_annotations()),
            &scenario_params(),
        )
        .unwrap();
        let annotations = outcome.annotations.unwrap();
        assert_eq!(annotations.len(), 2);
        assert_eq!(
            annotations.get(&CellId::from("c4")).unwrap(),
            &["B".to_string()]
        );
        assert_eq!(annotations.get(&CellId::from("c2")), None);
    }

    #[test]
    fn test_pipeline_rejects_mismatched_annotations_up_front() {
        let annotations = CellAnnotations::from_rows(
            vec!["cluster".to_string()],
            [(CellId::from("c1"), vec!["A".to_string()])],
        )
        .unwrap();
        let err = run_qc(&scenario_matrix(), Some(&annotations), &scenario_params())
            .unwrap_err();
        assert!(matches!(err, QcError::ShapeMismatch(_)), "{err}");
    }

    #[test]
    fn test_pipeline_input_is_untouched() {
        let matrix = scenario_matrix();
        let before = matrix.clone();
        run_qc(&matrix, None, &scenario_params()).unwrap();
        assert_eq!(matrix, before);
    }
}
