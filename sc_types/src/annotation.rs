//! External per-cell annotation tables.
//!
//! An annotation table arrives as a delimited text file keyed by a declared
//! cell-identifier column. Merging it onto a matrix is strict: the table and
//! the matrix must cover exactly the same set of cells, one row per cell.
//! Any identifier present on one side only is a [`QcError::ShapeMismatch`],
//! never a silent NULL-fill or drop.

use crate::error::QcError;
use crate::index::AxisIndex;
use crate::{CellId, IdHashMap};
use anyhow::{bail, Context, Result};
use itertools::Itertools;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// A per-cell annotation table with arbitrary extra fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CellAnnotations {
    /// Field names, excluding the key column.
    fields: Vec<String>,
    /// One row of field values per cell, keyed on the cell identifier.
    rows: IdHashMap<CellId, Vec<String>>,
}

impl CellAnnotations {
    /// Parse a delimited text file, using `key_column` as the cell
    /// identifier. Rows are trimmed; a repeated identifier is an error since
    /// the merge must preserve one-to-one correspondence.
    pub fn from_csv(path: &Path, key_column: &str) -> Result<Self> {
        let file = File::open(path).with_context(|| path.display().to_string())?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(detect_delimiter(path))
            .from_reader(BufReader::new(file));

        let mut headers = reader.headers()?.clone();
        headers.trim();
        let Some(key_position) = headers.iter().position(|h| h == key_column) else {
            bail!(
                "annotation file {} has no {key_column:?} column; found columns: {}",
                path.display(),
                headers.iter().join(", "),
            );
        };
        let fields: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != key_position)
            .map(|(_, h)| h.to_string())
            .collect();

        let mut rows = IdHashMap::default();
        for (line, record) in reader.records().enumerate() {
            let mut record = record?;
            record.trim();
            if record.len() != headers.len() {
                bail!(
                    "annotation file {} line {}: expected {} fields, found {}",
                    path.display(),
                    line + 2,
                    headers.len(),
                    record.len(),
                );
            }
            let cell = CellId::from(&record[key_position]);
            let values: Vec<String> = record
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != key_position)
                .map(|(_, v)| v.to_string())
                .collect();
            if rows.insert(cell.clone(), values).is_some() {
                bail!(
                    "annotation file {} has more than one row for cell {cell}",
                    path.display(),
                );
            }
        }

        Ok(CellAnnotations { fields, rows })
    }

    /// Build an annotation table directly from rows.
    pub fn from_rows(
        fields: Vec<String>,
        rows: impl IntoIterator<Item = (CellId, Vec<String>)>,
    ) -> Result<Self, QcError> {
        let mut map = IdHashMap::default();
        for (cell, values) in rows {
            if map.insert(cell.clone(), values).is_some() {
                return Err(QcError::DuplicateId {
                    axis: crate::Axis::Cells,
                    id: cell.to_string(),
                });
            }
        }
        Ok(CellAnnotations { fields, rows: map })
    }

    /// Field names, excluding the key column.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Look up the annotation row for one cell.
    pub fn get(&self, cell: &CellId) -> Option<&[String]> {
        self.rows.get(cell).map(Vec::as_slice)
    }

    /// Merge this table onto a matrix cell axis: return the rows reordered
    /// to match the axis, requiring exact one-to-one correspondence.
    pub fn merge(&self, cells: &AxisIndex<CellId>) -> Result<Vec<&[String]>, QcError> {
        let missing: Vec<&CellId> = cells
            .ids()
            .iter()
            .filter(|cell| !self.rows.contains_key(cell))
            .collect();
        if !missing.is_empty() {
            return Err(QcError::ShapeMismatch(format!(
                "annotation table is missing {} cell(s) present in the matrix: {}",
                missing.len(),
                missing.iter().take(5).join(", "),
            )));
        }
        if self.rows.len() != cells.len() {
            let extra: Vec<String> = self
                .rows
                .keys()
                .filter(|cell| !cells.contains(cell))
                .map(ToString::to_string)
                .sorted()
                .collect();
            return Err(QcError::ShapeMismatch(format!(
                "annotation table has {} cell(s) absent from the matrix: {}",
                extra.len(),
                extra.iter().take(5).join(", "),
            )));
        }
        Ok(cells
            .ids()
            .iter()
            .map(|cell| self.rows[cell].as_slice())
            .collect())
    }

    /// Restrict this table to the cells of the given axis. Used after cell
    /// filtering, once a strict merge against the unfiltered matrix has
    /// already succeeded; every axis cell must still have a row here.
    pub fn subset(&self, cells: &AxisIndex<CellId>) -> Result<CellAnnotations, QcError> {
        let rows: Vec<(CellId, Vec<String>)> = cells
            .ids()
            .iter()
            .map(|cell| {
                self.rows
                    .get(cell)
                    .map(|values| (cell.clone(), values.clone()))
                    .ok_or_else(|| {
                        QcError::ShapeMismatch(format!("cell {cell} has no annotation row"))
                    })
            })
            .collect::<Result<_, QcError>>()?;
        CellAnnotations::from_rows(self.fields.clone(), rows)
    }
}

/// Tab-delimited for `.tsv`/`.tsv.gz` extensions, comma otherwise.
fn detect_delimiter(path: &Path) -> u8 {
    let name = path.to_string_lossy();
    if name.ends_with(".tsv") || name.ends_with(".tsv.gz") || name.ends_with(".txt") {
        b'\t'
    } else {
        b','
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Axis;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn cell_axis(ids: &[&str]) -> AxisIndex<CellId> {
        AxisIndex::new(ids.iter().map(|s| CellId::from(*s)).collect(), Axis::Cells).unwrap()
    }

    fn write_annotations(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_and_merge_in_matrix_order() {
        let file = write_annotations(
            "cell_id,cluster,phase\nc2,B,G1\nc1,A,S\nc3,A,G2M\n",
        );
        let annotations = CellAnnotations::from_csv(file.path(), "cell_id").unwrap();
        assert_eq!(annotations.fields(), &["cluster", "phase"]);

        let rows = annotations.merge(&cell_axis(&["c1", "c2", "c3"])).unwrap();
        assert_eq!(
            rows,
            vec![
                ["A".to_string(), "S".to_string()].as_slice(),
                ["B".to_string(), "G1".to_string()].as_slice(),
                ["A".to_string(), "G2M".to_string()].as_slice(),
            ]
        );
    }

    #[test]
    fn test_merge_missing_cell_is_shape_mismatch() {
        let file = write_annotations("cell_id,cluster\nc1,A\nc2,B\n");
        let annotations = CellAnnotations::from_csv(file.path(), "cell_id").unwrap();
        let err = annotations.merge(&cell_axis(&["c1", "c2", "c3"])).unwrap_err();
        assert!(matches!(err, QcError::ShapeMismatch(_)), "{err}");
    }

    #[test]
    fn test_merge_extra_cell_is_shape_mismatch() {
        let file = write_annotations("cell_id,cluster\nc1,A\nc2,B\nc9,C\n");
        let annotations = CellAnnotations::from_csv(file.path(), "cell_id").unwrap();
        let err = annotations.merge(&cell_axis(&["c1", "c2"])).unwrap_err();
        assert!(matches!(err, QcError::ShapeMismatch(_)), "{err}");
    }

    #[test]
    fn test_duplicate_cell_row_rejected() {
        let file = write_annotations("cell_id,cluster\nc1,A\nc1,B\n");
        assert!(CellAnnotations::from_csv(file.path(), "cell_id").is_err());
    }

    #[test]
    fn test_missing_key_column_rejected() {
        let file = write_annotations("barcode,cluster\nc1,A\n");
        assert!(CellAnnotations::from_csv(file.path(), "cell_id").is_err());
    }

    #[test]
    fn test_subset_after_filtering() {
        let file = write_annotations("cell_id,cluster\nc1,A\nc2,B\nc3,C\n");
        let annotations = CellAnnotations::from_csv(file.path(), "cell_id").unwrap();
        let subset = annotations.subset(&cell_axis(&["c3", "c1"])).unwrap();
        assert_eq!(subset.len(), 2);
        assert_eq!(subset.get(&CellId::from("c3")).unwrap(), &["C".to_string()]);
        assert_eq!(subset.get(&CellId::from("c2")), None);
    }
}
