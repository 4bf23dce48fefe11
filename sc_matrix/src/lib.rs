//! The in-memory cell/gene count matrix and its exchange format.
#![deny(missing_docs)]

pub mod count_matrix;
pub mod mtx;

pub use count_matrix::{AnnotatedCount, Count, CountMatrix, MatrixDimensions};
pub use mtx::{MtxReader, MtxWriter};
