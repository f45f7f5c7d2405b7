//! Compressed sparse row matrix for one-hot encoded features

use crate::error::{MlopsError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Row-major sparse matrix.
///
/// Row `r` owns the entries `indptr[r]..indptr[r + 1]` of `indices` and `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl CsrMatrix {
    /// Empty matrix with `n_cols` columns; fill it with [`CsrMatrix::push_row`]
    pub fn new(n_cols: usize) -> Self {
        Self {
            n_rows: 0,
            n_cols,
            indptr: vec![0],
            indices: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Append a row given as `(column, value)` pairs
    pub fn push_row<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (usize, f64)>,
    {
        let mut row: Vec<(usize, f64)> = entries.into_iter().filter(|(_, v)| *v != 0.0).collect();
        row.sort_by_key(|(c, _)| *c);
        for (col, value) in row {
            if col >= self.n_cols {
                return Err(MlopsError::ShapeError {
                    expected: format!("column < {}", self.n_cols),
                    actual: col.to_string(),
                });
            }
            self.indices.push(col);
            self.data.push(value);
        }
        self.indptr.push(self.indices.len());
        self.n_rows += 1;
        Ok(())
    }

    pub fn nrows(&self) -> usize {
        self.n_rows
    }

    pub fn ncols(&self) -> usize {
        self.n_cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    /// Number of stored entries
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Non-zero entries of row `r`
    pub fn row(&self, r: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let span = self.indptr[r]..self.indptr[r + 1];
        self.indices[span.clone()]
            .iter()
            .copied()
            .zip(self.data[span].iter().copied())
    }

    /// Entry at `(r, c)`; zero when not stored
    pub fn get(&self, r: usize, c: usize) -> f64 {
        let span = self.indptr[r]..self.indptr[r + 1];
        match self.indices[span.clone()].binary_search(&c) {
            Ok(i) => self.data[span.start + i],
            Err(_) => 0.0,
        }
    }

    /// Matrix-vector product
    pub fn dot(&self, v: &Array1<f64>) -> Result<Array1<f64>> {
        if v.len() != self.n_cols {
            return Err(MlopsError::ShapeError {
                expected: format!("{} coefficients", self.n_cols),
                actual: v.len().to_string(),
            });
        }
        Ok((0..self.n_rows)
            .map(|r| self.row(r).map(|(c, x)| x * v[c]).sum())
            .collect())
    }

    /// Densify; only sensible when `n_rows * n_cols` fits in memory
    pub fn to_dense(&self) -> Array2<f64> {
        let mut out = Array2::zeros((self.n_rows, self.n_cols));
        for r in 0..self.n_rows {
            for (c, v) in self.row(r) {
                out[[r, c]] = v;
            }
        }
        out
    }

    /// Build from a dense matrix, skipping zeros
    pub fn from_dense(x: &Array2<f64>) -> Self {
        let mut m = Self::new(x.ncols());
        for row in x.rows() {
            for (c, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    m.indices.push(c);
                    m.data.push(v);
                }
            }
            m.indptr.push(m.indices.len());
            m.n_rows += 1;
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_push_and_dense() {
        let mut m = CsrMatrix::new(3);
        m.push_row([(2, 1.0), (0, 4.0)]).unwrap();
        m.push_row(std::iter::empty()).unwrap();
        m.push_row([(1, 2.5)]).unwrap();

        assert_eq!(m.shape(), (3, 3));
        assert_eq!(m.nnz(), 3);
        assert_eq!(
            m.to_dense(),
            array![[4.0, 0.0, 1.0], [0.0, 0.0, 0.0], [0.0, 2.5, 0.0]]
        );
    }

    #[test]
    fn test_get_reads_stored_and_implicit_zeros() {
        let dense = array![[0.0, 3.0, 0.0, 7.0], [0.0, 0.0, 0.0, 0.0], [1.0, 0.0, 2.0, 0.0]];
        let m = CsrMatrix::from_dense(&dense);
        for ((r, c), &v) in dense.indexed_iter() {
            assert_eq!(m.get(r, c), v);
        }
    }

    #[test]
    fn test_dot() {
        let m = CsrMatrix::from_dense(&array![[1.0, 0.0], [0.0, 2.0], [3.0, 1.0]]);
        let out = m.dot(&array![1.0, 10.0]).unwrap();
        assert_eq!(out, array![1.0, 20.0, 13.0]);
    }

    #[test]
    fn test_out_of_range_column() {
        let mut m = CsrMatrix::new(2);
        assert!(m.push_row([(5, 1.0)]).is_err());
    }
}
