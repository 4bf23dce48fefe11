//! Matrix Market exchange format.
//!
//! A matrix directory holds `matrix.mtx[.gz]` plus the `barcodes.tsv[.gz]`
//! and `features.tsv[.gz]` sidecars. The coordinate file is feature-major
//! and 1-based: each data line is `gene cell count`, with the shape line
//! giving `num_genes num_cells num_non_zeros`. Writes always gzip; reads
//! accept both gzipped and plain files.

use crate::count_matrix::{Count, CountMatrix};
use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sc_types::{CellId, GeneDef};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const MTX_FILE: &str = "matrix.mtx";
const BARCODES_FILE: &str = "barcodes.tsv";
const FEATURES_FILE: &str = "features.tsv";

const MTX_BANNER: &str = "%%MatrixMarket matrix coordinate integer general";
const FEATURE_TYPE_GENE: &str = "Gene Expression";

#[derive(Serialize, Deserialize)]
struct FeatureTsvRow {
    // `ENSG00000243485` for example
    id: String,
    // `MIR1302-2HG` for example
    name: String,
    // `Gene Expression` for example
    feature_type: String,
}

/// Writes a count matrix directory.
pub struct MtxWriter {
    folder: PathBuf,
}

impl MtxWriter {
    /// Create the output directory. Fails if it already exists.
    pub fn new(folder: &Path) -> Result<Self> {
        std::fs::create_dir(folder)
            .with_context(|| format!("creating matrix directory {}", folder.display()))?;
        Ok(MtxWriter {
            folder: folder.to_path_buf(),
        })
    }

    /// Write the matrix and both sidecars.
    pub fn write(&self, matrix: &CountMatrix, software_version: &str) -> Result<()> {
        self.write_matrix_mtx(matrix, software_version)?;
        self.write_barcodes_tsv(matrix.cells().ids())?;
        self.write_features_tsv(matrix.gene_defs())
    }

    fn gz_writer(&self, name: &str) -> Result<BufWriter<GzEncoder<File>>> {
        let path = self.folder.join(format!("{name}.gz"));
        let file =
            File::create(&path).with_context(|| path.display().to_string())?;
        Ok(BufWriter::new(GzEncoder::new(file, Compression::fast())))
    }

    fn write_barcodes_tsv(&self, cells: &[CellId]) -> Result<()> {
        let mut writer = self.gz_writer(BARCODES_FILE)?;
        for cell in cells {
            writeln!(writer, "{cell}")?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_features_tsv(&self, genes: &[GeneDef]) -> Result<()> {
        let writer = self.gz_writer(FEATURES_FILE)?;
        let mut tsv = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(writer);
        for def in genes {
            tsv.serialize(FeatureTsvRow {
                id: def.id.to_string(),
                name: def.name.clone(),
                feature_type: FEATURE_TYPE_GENE.to_string(),
            })?;
        }
        tsv.flush()?;
        Ok(())
    }

    fn write_matrix_mtx(&self, matrix: &CountMatrix, software_version: &str) -> Result<()> {
        let mut writer = self.gz_writer(MTX_FILE)?;

        // The banner, matrix dimensions, and number of non-zero entries.
        writeln!(
            writer,
            r#"{MTX_BANNER}
%metadata_json: {{"software_version": "{}", "format_version": 2}}
{} {} {}"#,
            software_version,
            matrix.num_genes(),
            matrix.num_cells(),
            matrix.num_non_zeros(),
        )?;

        for cell in 0..matrix.num_cells() {
            for (gene, count) in matrix.cell_counts(cell) {
                // indices are 1-based
                writeln!(writer, "{} {} {}", 1 + gene, 1 + cell, count)?;
            }
        }

        writer.flush()?;
        Ok(())
    }
}

/// Reads a count matrix directory.
pub struct MtxReader {
    folder: PathBuf,
}

impl MtxReader {
    /// Open an existing matrix directory.
    pub fn new(folder: &Path) -> Result<Self> {
        if !folder.is_dir() {
            bail!("matrix directory {} does not exist", folder.display());
        }
        Ok(MtxReader {
            folder: folder.to_path_buf(),
        })
    }

    /// Read the matrix and both sidecars into memory.
    pub fn read(&self) -> Result<CountMatrix> {
        let cells = self.read_barcodes_tsv()?;
        let genes = self.read_features_tsv()?;
        self.read_matrix_mtx(cells, genes)
            .with_context(|| format!("reading {}", self.folder.join(MTX_FILE).display()))
    }

    /// Open `name.gz` if present, else `name`.
    fn open_maybe_gzip(&self, name: &str) -> Result<Box<dyn Read>> {
        let gz_path = self.folder.join(format!("{name}.gz"));
        if gz_path.exists() {
            let file =
                File::open(&gz_path).with_context(|| gz_path.display().to_string())?;
            return Ok(Box::new(MultiGzDecoder::new(file)));
        }
        let path = self.folder.join(name);
        let file = File::open(&path).with_context(|| path.display().to_string())?;
        Ok(Box::new(file))
    }

    fn read_barcodes_tsv(&self) -> Result<Vec<CellId>> {
        let reader = BufReader::new(self.open_maybe_gzip(BARCODES_FILE)?);
        let mut cells = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let id = line.trim();
            if !id.is_empty() {
                cells.push(CellId::from(id));
            }
        }
        Ok(cells)
    }

    fn read_features_tsv(&self) -> Result<Vec<GeneDef>> {
        let mut tsv = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_reader(BufReader::new(self.open_maybe_gzip(FEATURES_FILE)?));
        let mut genes = Vec::new();
        for record in tsv.records() {
            let record = record?;
            let id = record
                .get(0)
                .with_context(|| "features.tsv has an empty row")?;
            // The name column is optional in older exports.
            let name = record.get(1).unwrap_or(id);
            genes.push(GeneDef::new(id, name));
        }
        Ok(genes)
    }

    fn read_matrix_mtx(
        &self,
        cells: Vec<CellId>,
        genes: Vec<GeneDef>,
    ) -> Result<CountMatrix> {
        let reader = BufReader::new(self.open_maybe_gzip(MTX_FILE)?);
        let mut lines = reader.lines();

        let banner = lines
            .next()
            .with_context(|| "empty matrix file")??;
        if !banner.starts_with("%%MatrixMarket") || !banner.contains("coordinate") {
            bail!("unsupported Matrix Market banner: {banner}");
        }

        // Skip comments; the first data line is the shape.
        let shape_line = loop {
            match lines.next() {
                None => bail!("matrix file ends before the shape line"),
                Some(line) => {
                    let line = line?;
                    if !line.starts_with('%') && !line.trim().is_empty() {
                        break line;
                    }
                }
            }
        };
        let shape: Vec<usize> = shape_line
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<_, _>>()
            .with_context(|| format!("parsing shape line {shape_line:?}"))?;
        let [num_genes, num_cells, num_non_zeros] = shape.as_slice() else {
            bail!("malformed shape line {shape_line:?}");
        };
        if *num_genes != genes.len() || *num_cells != cells.len() {
            bail!(
                "matrix shape {num_genes} x {num_cells} does not match \
                 {} features and {} barcodes",
                genes.len(),
                cells.len(),
            );
        }

        let mut triplets = Vec::with_capacity(*num_non_zeros);
        for line in lines {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('%') {
                continue;
            }
            let mut fields = trimmed.split_whitespace();
            let (Some(gene), Some(cell), Some(count)) =
                (fields.next(), fields.next(), fields.next())
            else {
                bail!("malformed matrix entry {line:?}");
            };
            let gene: usize = gene.parse().with_context(|| line.clone())?;
            let cell: usize = cell.parse().with_context(|| line.clone())?;
            let count: Count = count.parse().with_context(|| line.clone())?;
            if gene == 0 || cell == 0 {
                bail!("matrix entry {line:?} uses 0-based indices; expected 1-based");
            }
            triplets.push((cell - 1, gene - 1, count));
        }
        if triplets.len() != *num_non_zeros {
            bail!(
                "matrix file declares {num_non_zeros} entries but contains {}",
                triplets.len(),
            );
        }

        Ok(CountMatrix::from_triplets(cells, genes, triplets)?)
    }
}
