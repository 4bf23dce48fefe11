//! Cell/gene quality control.
//!
//! Decides, from raw counts, which cells and genes are retained for
//! downstream analysis, and annotates survivors with quality metrics. Every
//! step is a pure function over the matrix it receives: thresholds are
//! applied as a single combined predicate per call, statistics are always
//! recomputed from the immediately preceding matrix state, and a filter that
//! would empty an axis is an error rather than an empty result.

pub mod filters;
pub mod hvg;
pub mod normalize;
pub mod pipeline;
pub mod stats;

pub use filters::{
    drop_zero_expression_genes, filter_by_mito_fraction, filter_cells, filter_genes,
    mito_fraction, mitochondrial_gene_selector, CellFilter,
};
pub use hvg::{remove_gene_subset_from_selection, select_highly_variable, HvgParams, HvgStats};
pub use normalize::{normalize, NormalizeParams, NormalizedMatrix};
pub use pipeline::{run_qc, QcOutcome, QcParams, QcSummary};
pub use stats::{CellStats, GeneStats};
