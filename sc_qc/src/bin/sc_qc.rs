//! Command-line front end for the QC pipeline.
//!
//! Reads a Matrix Market directory, runs the filtering pipeline, and writes
//! a filtered matrix directory, a run report, and (when an annotation table
//! was supplied) the annotations of the surviving cells.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use sc_matrix::{MtxReader, MtxWriter};
use sc_qc::{run_qc, CellFilter, HvgParams, NormalizeParams, QcOutcome, QcParams};
use sc_types::{CellAnnotations, GeneId, IdHashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(version, about = "Filter a cell/gene count matrix on quality metrics")]
struct Args {
    /// Matrix Market directory holding matrix.mtx[.gz] with its
    /// barcodes/features sidecars.
    #[arg(long)]
    matrix: PathBuf,

    /// Output directory; created if absent.
    #[arg(long)]
    out: PathBuf,

    /// Optional per-cell annotation table (CSV, or TSV by extension).
    #[arg(long)]
    annotations: Option<PathBuf>,

    /// Name of the cell-identifier column of the annotation table.
    #[arg(long, default_value = "cell_id")]
    annotation_key: String,

    /// Minimum number of detected genes for a retained cell.
    #[arg(long, default_value_t = 200)]
    min_genes: u32,

    /// Minimum total count for a retained cell.
    #[arg(long, default_value_t = 0)]
    min_counts: i64,

    /// Minimum number of expressing cells for a retained gene.
    #[arg(long, default_value_t = 3)]
    min_cells: u32,

    /// Maximum mitochondrial fraction for a retained cell.
    #[arg(long, default_value_t = 0.1)]
    max_mito_fraction: f64,

    /// Per-cell target sum for normalization; defaults to the median of the
    /// nonzero per-cell totals.
    #[arg(long)]
    target_sum: Option<f64>,

    /// Skip the ln(1 + x) transform after scaling.
    #[arg(long)]
    no_log1p: bool,

    /// Number of mean bins for dispersion normalization.
    #[arg(long, default_value_t = 20)]
    hvg_bins: usize,

    /// Lower mean cutoff for highly variable genes.
    #[arg(long, default_value_t = 0.0125)]
    hvg_min_mean: f64,

    /// Upper mean cutoff for highly variable genes.
    #[arg(long, default_value_t = 3.0)]
    hvg_max_mean: f64,

    /// Normalized-dispersion cutoff for highly variable genes.
    #[arg(long, default_value_t = 0.5)]
    hvg_min_disp: f64,

    /// File of gene identifiers (one per line) to clear from the
    /// highly-variable selection.
    #[arg(long)]
    exclude_genes: Option<PathBuf>,
}

impl Args {
    fn qc_params(&self) -> Result<QcParams> {
        Ok(QcParams {
            cell_filter: CellFilter {
                min_genes: self.min_genes,
                min_counts: self.min_counts,
            },
            max_mito_fraction: self.max_mito_fraction,
            min_cells_per_gene: self.min_cells,
            normalize: NormalizeParams {
                target_sum: self.target_sum,
                log1p: !self.no_log1p,
            },
            hvg: HvgParams {
                n_bins: self.hvg_bins,
                min_mean: self.hvg_min_mean,
                max_mean: self.hvg_max_mean,
                min_disp: self.hvg_min_disp,
            },
            exclude_from_selection: match &self.exclude_genes {
                Some(path) => read_gene_list(path)?,
                None => IdHashSet::default(),
            },
        })
    }
}

/// One gene identifier per line; blank lines are skipped.
fn read_gene_list(path: &Path) -> Result<IdHashSet<GeneId>> {
    let file = File::open(path).with_context(|| path.display().to_string())?;
    let mut genes = IdHashSet::default();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let id = line.trim();
        if !id.is_empty() {
            genes.insert(GeneId::from(id));
        }
    }
    Ok(genes)
}

fn write_annotations_csv(
    path: &Path,
    annotations: &CellAnnotations,
    outcome: &QcOutcome,
) -> Result<()> {
    let file = File::create(path).with_context(|| path.display().to_string())?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    writer.write_record(
        std::iter::once("cell_id").chain(annotations.fields().iter().map(String::as_str)),
    )?;
    let cells = outcome.matrix.cells();
    for (cell, row) in cells.ids().iter().zip(annotations.merge(cells)?) {
        writer.write_record(std::iter::once(cell.as_ref()).chain(row.iter().map(String::as_str)))?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let matrix = MtxReader::new(&args.matrix)?
        .read()
        .with_context(|| format!("reading matrix directory {}", args.matrix.display()))?;
    let dims = matrix.dimensions();
    info!(
        "loaded {} cells x {} genes, {} non-zeros (~{:.3} GiB resident)",
        dims.num_cells,
        dims.num_genes,
        dims.num_non_zeros,
        dims.estimate_mem_gib(),
    );
    let annotations = args
        .annotations
        .as_deref()
        .map(|path| CellAnnotations::from_csv(path, &args.annotation_key))
        .transpose()?;

    let outcome = run_qc(&matrix, annotations.as_ref(), &args.qc_params()?)?;

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("creating output directory {}", args.out.display()))?;
    let matrix_dir = args.out.join("filtered_matrix");
    MtxWriter::new(&matrix_dir)?.write(
        &outcome.matrix,
        &format!("sc_qc {}", env!("CARGO_PKG_VERSION")),
    )?;

    let summary_path = args.out.join("qc_summary.json");
    let summary_file =
        File::create(&summary_path).with_context(|| summary_path.display().to_string())?;
    serde_json::to_writer_pretty(BufWriter::new(summary_file), &outcome.summary)?;

    if let Some(annotations) = &outcome.annotations {
        write_annotations_csv(&args.out.join("annotations.csv"), annotations, &outcome)?;
    }

    info!(
        "wrote {} cells x {} genes to {}",
        outcome.matrix.num_cells(),
        outcome.matrix.num_genes(),
        matrix_dir.display(),
    );
    Ok(())
}
