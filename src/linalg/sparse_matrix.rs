use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

/// Wrapper around a [CooMatrix] used to collect square matrices from Elem contributions
///
/// Duplicate entries are summed when the matrix is compressed with [SparseMatrix::to_csr]
#[derive(Clone, Debug)]
pub struct SparseMatrix {
    /// Size of the square matrix
    pub dimension: usize,
    entries: CooMatrix<f64>,
}

impl SparseMatrix {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: CooMatrix::new(dimension, dimension),
        }
    }

    /// Number of stored (uncompressed) entries
    pub fn num_entries(&self) -> usize {
        self.entries.nnz()
    }

    /// Add a value to the matrix
    pub fn insert(&mut self, [row_idx, col_idx]: [usize; 2], value: f64) {
        assert!(
            row_idx < self.dimension && col_idx < self.dimension,
            "index exceeded matrix dimension; cannot insert value!"
        );
        self.entries.push(row_idx, col_idx, value);
    }

    /// Insert a group of entries
    pub fn insert_group(&mut self, entry_group: Vec<([usize; 2], f64)>) {
        for (rc, value) in entry_group {
            self.insert(rc, value);
        }
    }

    /// Compressed row storage with duplicates summed
    pub fn to_csr(&self) -> CsrMatrix<f64> {
        CsrMatrix::from(&self.entries)
    }
}

impl From<&SparseMatrix> for DMatrix<f64> {
    fn from(matrix: &SparseMatrix) -> Self {
        let mut dense = DMatrix::zeros(matrix.dimension, matrix.dimension);
        for (r, c, v) in matrix.entries.triplet_iter() {
            dense[(r, c)] += *v;
        }
        dense
    }
}

/// `A x` for a compressed matrix. Rows are processed in parallel.
pub fn csr_mul(a: &CsrMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    let offsets = a.row_offsets();
    let cols = a.col_indices();
    let values = a.values();

    let y: Vec<f64> = (0..a.nrows())
        .into_par_iter()
        .map(|row| {
            (offsets[row]..offsets[row + 1])
                .map(|k| values[k] * x[cols[k]])
                .sum()
        })
        .collect();

    DVector::from_vec(y)
}

/// Diagonal entries of a compressed matrix (zero where nothing is stored)
pub fn csr_diagonal(a: &CsrMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(
        a.nrows(),
        a.row_iter().enumerate().map(|(row_idx, row)| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .filter(|(col, _)| **col == row_idx)
                .map(|(_, v)| *v)
                .sum()
        }),
    )
}
