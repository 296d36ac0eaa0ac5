//! Dense row-major matrices and the row-blocks carved out of them.
//!
//! Every buffer in a run is allocated through [`Matrix::zeros`], which
//! reserves fallibly so that an oversized run surfaces as
//! [`NodeError::Allocation`] instead of aborting the process.

use crate::errors::{NodeError, Result};
use rand::Rng;
use std::ops::Range;

/// Dense, row-major matrix of `f64` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Allocate a zero-filled `rows x cols` matrix.
    ///
    /// # Errors
    /// Returns [`NodeError::Allocation`] if the element count overflows or the
    /// allocator cannot reserve the buffer.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        let len = rows.checked_mul(cols).ok_or(NodeError::Allocation {
            elements: usize::MAX,
        })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| NodeError::Allocation { elements: len })?;
        data.resize(len, 0.0);

        Ok(Self { rows, cols, data })
    }

    /// Wrap an existing row-major buffer.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(NodeError::Shape(format!(
                "Data length {} doesn't match {}x{}",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Build a matrix from nested rows; every row must have the same width.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(NodeError::Shape(format!(
                    "Row {} has width {}, expected {}",
                    i,
                    row.len(),
                    cols
                )));
            }
            data.extend_from_slice(row);
        }
        Self::from_vec(rows.len(), cols, data)
    }

    /// `n x n` identity matrix.
    pub fn identity(n: usize) -> Result<Self> {
        let mut m = Self::zeros(n, n)?;
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        Ok(m)
    }

    /// Matrix with entries drawn uniformly from `[0, 1)`.
    pub fn random<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Result<Self> {
        let mut m = Self::zeros(rows, cols)?;
        for value in m.data.iter_mut() {
            *value = rng.gen::<f64>();
        }
        Ok(m)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Element at `(row, col)`, or `None` when out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    /// Borrow one row.
    ///
    /// # Panics
    /// Panics if `row >= self.rows()`.
    pub fn row(&self, row: usize) -> &[f64] {
        assert!(row < self.rows, "Row {} out of bounds ({} rows)", row, self.rows);
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Copy a contiguous band of rows into a new matrix.
    pub fn rows_slice(&self, rows: Range<usize>) -> Result<Matrix> {
        if rows.start > rows.end || rows.end > self.rows {
            return Err(NodeError::Shape(format!(
                "Row range {:?} out of bounds ({} rows)",
                rows, self.rows
            )));
        }
        let data = self.data[rows.start * self.cols..rows.end * self.cols].to_vec();
        Matrix::from_vec(rows.len(), self.cols, data)
    }

    /// Standard dense product `self * rhs`.
    ///
    /// Uses i-k-j loop order so the inner loop streams over contiguous rows
    /// of both `rhs` and the output. Each output element still accumulates
    /// its terms in ascending `k`, so the result is bit-identical to
    /// [`Matrix::matmul_serial`].
    pub fn matmul(&self, rhs: &Matrix) -> Result<Matrix> {
        self.check_product_shape(rhs)?;
        let mut out = Matrix::zeros(self.rows, rhs.cols)?;
        let n = rhs.cols;

        for i in 0..self.rows {
            let out_row = &mut out.data[i * n..(i + 1) * n];
            for k in 0..self.cols {
                let a_ik = self.data[i * self.cols + k];
                let rhs_row = &rhs.data[k * n..(k + 1) * n];
                for (c, b) in out_row.iter_mut().zip(rhs_row) {
                    *c += a_ik * b;
                }
            }
        }

        Ok(out)
    }

    /// Textbook triple loop (i-j-k), used as the serial baseline.
    pub fn matmul_serial(&self, rhs: &Matrix) -> Result<Matrix> {
        self.check_product_shape(rhs)?;
        let mut out = Matrix::zeros(self.rows, rhs.cols)?;

        for i in 0..self.rows {
            for j in 0..rhs.cols {
                let mut acc = 0.0;
                for k in 0..self.cols {
                    acc += self.data[i * self.cols + k] * rhs.data[k * rhs.cols + j];
                }
                out.data[i * rhs.cols + j] = acc;
            }
        }

        Ok(out)
    }

    /// Largest element-wise relative error against `other`.
    ///
    /// Elements whose magnitude is below 1.0 are compared absolutely.
    pub fn max_relative_error(&self, other: &Matrix) -> Result<f64> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(NodeError::Shape(format!(
                "Cannot compare {}x{} with {}x{}",
                self.rows, self.cols, other.rows, other.cols
            )));
        }

        Ok(self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs() / b.abs().max(1.0))
            .fold(0.0, f64::max))
    }

    fn check_product_shape(&self, rhs: &Matrix) -> Result<()> {
        if self.cols != rhs.rows {
            return Err(NodeError::Shape(format!(
                "Matrix dimensions incompatible: {}x{} * {}x{}",
                self.rows, self.cols, rhs.rows, rhs.cols
            )));
        }
        Ok(())
    }
}

/// A contiguous horizontal slice of a logical matrix, owned by one rank.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBlock {
    /// Rank that owns this block
    pub owner: usize,
    /// Global index of the block's first row
    pub first_row: usize,
    /// The block's rows (`rows_per_worker x N`)
    pub data: Matrix,
}

impl RowBlock {
    pub fn new(owner: usize, first_row: usize, data: Matrix) -> Self {
        Self {
            owner,
            first_row,
            data,
        }
    }

    /// Global row range covered by this block.
    pub fn row_range(&self) -> Range<usize> {
        self.first_row..self.first_row + self.data.rows()
    }

    /// Multiply this block by a full right-hand operand, keeping ownership tags.
    pub fn multiply(&self, rhs: &Matrix) -> Result<RowBlock> {
        Ok(RowBlock::new(self.owner, self.first_row, self.data.matmul(rhs)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_zeros_and_identity() {
        let z = Matrix::zeros(2, 3).unwrap();
        assert_eq!(z.len(), 6);
        assert!(z.as_slice().iter().all(|&x| x == 0.0));

        let id = Matrix::identity(3).unwrap();
        assert_eq!(id.get(0, 0), Some(1.0));
        assert_eq!(id.get(0, 1), Some(0.0));
        assert_eq!(id.get(3, 0), None);
    }

    #[test]
    fn test_zeros_overflow_is_allocation_failure() {
        let err = Matrix::zeros(usize::MAX, 2).unwrap_err();
        assert!(matches!(err, NodeError::Allocation { .. }));
    }

    #[test]
    fn test_from_vec_shape_mismatch() {
        let err = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, NodeError::Shape(_)));
    }

    #[test]
    fn test_from_rows_ragged() {
        let err = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, NodeError::Shape(_)));
    }

    #[test]
    fn test_matmul_small() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let b = Matrix::from_rows(&[vec![5.0, 6.0], vec![7.0, 8.0]]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.as_slice(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_rectangular_block() {
        // 1x3 block times 3x3 operand
        let block = Matrix::from_rows(&[vec![1.0, 0.0, 2.0]]).unwrap();
        let b = Matrix::from_rows(&[
            vec![1.0, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
            vec![7.0, 8.0, 9.0],
        ])
        .unwrap();
        let c = block.matmul(&b).unwrap();
        assert_eq!(c.rows(), 1);
        assert_eq!(c.as_slice(), &[15.0, 18.0, 21.0]);
    }

    #[test]
    fn test_matmul_dimension_mismatch() {
        let a = Matrix::zeros(2, 3).unwrap();
        let b = Matrix::zeros(2, 3).unwrap();
        assert!(matches!(a.matmul(&b), Err(NodeError::Shape(_))));
    }

    #[test]
    fn test_matmul_matches_serial_bitwise() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = Matrix::random(9, 9, &mut rng).unwrap();
        let b = Matrix::random(9, 9, &mut rng).unwrap();

        let fast = a.matmul(&b).unwrap();
        let serial = a.matmul_serial(&b).unwrap();
        assert_eq!(fast, serial);
    }

    #[test]
    fn test_rows_slice() {
        let m = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        let band = m.rows_slice(1..3).unwrap();
        assert_eq!(band.as_slice(), &[3.0, 4.0, 5.0, 6.0]);
        assert!(m.rows_slice(2..4).is_err());
    }

    #[test]
    fn test_max_relative_error() {
        let a = Matrix::from_rows(&[vec![100.0, 0.5]]).unwrap();
        let b = Matrix::from_rows(&[vec![101.0, 0.5]]).unwrap();
        let err = a.max_relative_error(&b).unwrap();
        assert!((err - 1.0 / 101.0).abs() < 1e-12);
    }

    #[test]
    fn test_row_block_range_and_multiply() {
        let block = RowBlock::new(1, 2, Matrix::from_rows(&[vec![1.0, 1.0], vec![2.0, 0.0]]).unwrap());
        assert_eq!(block.row_range(), 2..4);

        let product = block.multiply(&Matrix::identity(2).unwrap()).unwrap();
        assert_eq!(product.owner, 1);
        assert_eq!(product.first_row, 2);
        assert_eq!(product.data, block.data);
    }
}
