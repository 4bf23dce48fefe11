//! Highly-variable-gene selection.
//!
//! Genes are scored by the dispersion (variance over mean) of their
//! normalized expression across cells, normalized within mean bins so that
//! highly expressed genes are not favored merely for their scale. Selection
//! is a boolean flag per gene; it never removes columns from the matrix,
//! only marks the subset used for downstream computation.

use crate::normalize::NormalizedMatrix;
use log::info;
use sc_types::{AxisIndex, GeneId, IdHashSet, QcError};

/// Cutoffs for [`select_highly_variable`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HvgParams {
    /// Number of equal-width mean bins used to normalize dispersions.
    pub n_bins: usize,
    /// Lower bound (exclusive) on a selected gene's mean expression.
    pub min_mean: f64,
    /// Upper bound (exclusive) on a selected gene's mean expression.
    pub max_mean: f64,
    /// Lower bound (inclusive) on a selected gene's normalized dispersion.
    pub min_disp: f64,
}

impl Default for HvgParams {
    fn default() -> Self {
        HvgParams {
            n_bins: 20,
            min_mean: 0.0125,
            max_mean: 3.0,
            min_disp: 0.5,
        }
    }
}

/// Per-gene variability scores and the selection flags they imply.
#[derive(Debug, Clone, PartialEq)]
pub struct HvgStats {
    /// Mean normalized expression per gene.
    pub means: Vec<f64>,
    /// Raw dispersion (variance / mean) per gene; 0 for unexpressed genes.
    pub dispersions: Vec<f64>,
    /// Dispersion z-scored within mean bins.
    pub normalized_dispersions: Vec<f64>,
    /// Whether each gene passes the mean window and dispersion cutoff.
    pub selected: Vec<bool>,
}

/// Score every gene and flag the highly variable ones.
///
/// Fails on a matrix with fewer than two cells, where variance is undefined.
pub fn select_highly_variable(
    matrix: &NormalizedMatrix,
    params: &HvgParams,
) -> Result<HvgStats, QcError> {
    let num_cells = matrix.num_cells();
    let num_genes = matrix.num_genes();
    if num_cells < 2 {
        return Err(QcError::UndefinedMetric {
            metric: "per-gene dispersion".to_string(),
            reason: format!("variance is undefined over {num_cells} cell(s)"),
        });
    }

    // Accumulate sums over the sparse values; absent entries are zeros and
    // contribute only through the cell count.
    let mut sums = vec![0.0f64; num_genes];
    let mut square_sums = vec![0.0f64; num_genes];
    for cell in 0..num_cells {
        for (gene, value) in matrix.cell_values(cell) {
            sums[gene] += value;
            square_sums[gene] += value * value;
        }
    }

    let n = num_cells as f64;
    let means: Vec<f64> = sums.iter().map(|&sum| sum / n).collect();
    let dispersions: Vec<f64> = (0..num_genes)
        .map(|gene| {
            if means[gene] <= 0.0 {
                return 0.0;
            }
            let variance = (square_sums[gene] - sums[gene] * sums[gene] / n) / (n - 1.0);
            variance / means[gene]
        })
        .collect();

    let normalized_dispersions = normalize_within_mean_bins(&means, &dispersions, params.n_bins);

    let selected: Vec<bool> = (0..num_genes)
        .map(|gene| {
            means[gene] > params.min_mean
                && means[gene] < params.max_mean
                && normalized_dispersions[gene] >= params.min_disp
        })
        .collect();
    info!(
        "flagged {}/{num_genes} genes as highly variable",
        selected.iter().filter(|&&s| s).count(),
    );

    Ok(HvgStats {
        means,
        dispersions,
        normalized_dispersions,
        selected,
    })
}

/// Z-score dispersions within equal-width bins of the mean.
fn normalize_within_mean_bins(means: &[f64], dispersions: &[f64], n_bins: usize) -> Vec<f64> {
    let n_bins = n_bins.max(1);
    let lo = means.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = (hi - lo) / n_bins as f64;

    let bin_of = |mean: f64| -> usize {
        if width <= 0.0 {
            0
        } else {
            (((mean - lo) / width) as usize).min(n_bins - 1)
        }
    };

    let mut bin_count = vec![0usize; n_bins];
    let mut bin_sum = vec![0.0f64; n_bins];
    let mut bin_square_sum = vec![0.0f64; n_bins];
    for (&mean, &dispersion) in means.iter().zip(dispersions) {
        let bin = bin_of(mean);
        bin_count[bin] += 1;
        bin_sum[bin] += dispersion;
        bin_square_sum[bin] += dispersion * dispersion;
    }

    let bin_stats: Vec<(f64, f64)> = (0..n_bins)
        .map(|bin| {
            if bin_count[bin] < 2 {
                return (0.0, 0.0);
            }
            let count = bin_count[bin] as f64;
            let mean = bin_sum[bin] / count;
            let variance = (bin_square_sum[bin] - bin_sum[bin] * bin_sum[bin] / count)
                / (count - 1.0);
            (mean, variance.max(0.0).sqrt())
        })
        .collect();

    means
        .iter()
        .zip(dispersions)
        .map(|(&mean, &dispersion)| {
            let (bin_mean, bin_std) = bin_stats[bin_of(mean)];
            if bin_std > 0.0 {
                (dispersion - bin_mean) / bin_std
            } else {
                0.0
            }
        })
        .collect()
}

/// Clear the selection flag for every gene in the exclusion set.
///
/// A pure set difference over the flags: genes outside the intersection are
/// untouched, nothing is removed from the matrix itself, and applying the
/// same exclusion twice is a no-op the second time. Returns the number of
/// flags cleared.
pub fn remove_gene_subset_from_selection(
    selected: &mut [bool],
    genes: &AxisIndex<GeneId>,
    excluded: &IdHashSet<GeneId>,
) -> Result<usize, QcError> {
    if selected.len() != genes.len() {
        return Err(QcError::ShapeMismatch(format!(
            "{} selection flags supplied for {} genes",
            selected.len(),
            genes.len(),
        )));
    }
    let mut cleared = 0;
    for (position, id) in genes.ids().iter().enumerate() {
        if selected[position] && excluded.contains(id) {
            selected[position] = false;
            cleared += 1;
        }
    }
    Ok(cleared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize, NormalizeParams};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use sc_matrix::count_matrix::toy_axes;
    use sc_matrix::CountMatrix;
    use sc_types::Axis;

    /// Every row sums to 12, so a target of 12 leaves values unscaled.
    /// g1 is constant, g2 is strongly bimodal, g3 mildly variable.
    fn normalized_fixture() -> NormalizedMatrix {
        let (cells, genes) = toy_axes(4, 3);
        let matrix = CountMatrix::from_dense(
            cells,
            genes,
            &[
                vec![3, 0, 9],
                vec![3, 6, 3],
                vec![3, 0, 9],
                vec![3, 6, 3],
            ],
        )
        .unwrap();
        normalize(
            &matrix,
            &NormalizeParams {
                target_sum: Some(12.0),
                log1p: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_dispersion_scores() {
        let stats = select_highly_variable(
            &normalized_fixture(),
            &HvgParams {
                n_bins: 1,
                min_mean: 0.1,
                max_mean: 100.0,
                min_disp: 1.0,
            },
        )
        .unwrap();
        assert_eq!(stats.means, vec![3.0, 3.0, 6.0]);
        // g1: variance 0. g2: variance 12 over mean 3. g3: variance 12 over mean 6.
        assert_eq!(stats.dispersions, vec![0.0, 4.0, 2.0]);
        // Bin stats over [0, 4, 2]: mean 2, std 2.
        assert_eq!(stats.normalized_dispersions, vec![-1.0, 1.0, 0.0]);
        assert_eq!(stats.selected, vec![false, true, false]);
    }

    #[test]
    fn test_single_cell_is_undefined() {
        let (cells, genes) = toy_axes(1, 2);
        let matrix = CountMatrix::from_dense(cells, genes, &[vec![1, 2]]).unwrap();
        let normalized = normalize(
            &matrix,
            &NormalizeParams {
                target_sum: Some(1.0),
                log1p: false,
            },
        )
        .unwrap();
        assert!(matches!(
            select_highly_variable(&normalized, &HvgParams::default()).unwrap_err(),
            QcError::UndefinedMetric { .. }
        ));
    }

    #[test]
    fn test_exclusion_clears_only_the_intersection() {
        let genes = AxisIndex::new(
            vec![GeneId::from("g1"), GeneId::from("g2"), GeneId::from("g3")],
            Axis::Genes,
        )
        .unwrap();
        let mut selected = vec![true, true, false];
        // g3 is excluded but unselected; g9 is not in the matrix at all.
        let excluded: IdHashSet<GeneId> =
            [GeneId::from("g2"), GeneId::from("g3"), GeneId::from("g9")]
                .into_iter()
                .collect();
        let cleared =
            remove_gene_subset_from_selection(&mut selected, &genes, &excluded).unwrap();
        assert_eq!(cleared, 1);
        assert_eq!(selected, vec![true, false, false]);
    }

    #[test]
    fn test_exclusion_flag_length_mismatch() {
        let genes =
            AxisIndex::new(vec![GeneId::from("g1")], Axis::Genes).unwrap();
        let mut selected = vec![true, false];
        assert!(matches!(
            remove_gene_subset_from_selection(
                &mut selected,
                &genes,
                &IdHashSet::default(),
            )
            .unwrap_err(),
            QcError::ShapeMismatch(_)
        ));
    }

    proptest! {
        /// Applying the same exclusion twice yields the same flags as once.
        #[test]
        fn prop_exclusion_is_idempotent(
            flags in proptest::collection::vec(any::<bool>(), 6),
            excluded_mask in proptest::collection::vec(any::<bool>(), 6),
        ) {
            let genes = AxisIndex::new(
                (0..6).map(|i| GeneId(format!("g{i}"))).collect(),
                Axis::Genes,
            )
            .unwrap();
            let excluded: IdHashSet<GeneId> = excluded_mask
                .iter()
                .enumerate()
                .filter_map(|(i, &x)| x.then(|| GeneId(format!("g{i}"))))
                .collect();

            let mut once = flags.clone();
            remove_gene_subset_from_selection(&mut once, &genes, &excluded).unwrap();
            let mut twice = once.clone();
            let cleared =
                remove_gene_subset_from_selection(&mut twice, &genes, &excluded).unwrap();
            prop_assert_eq!(cleared, 0);
            prop_assert_eq!(once, twice);
        }
    }
}
