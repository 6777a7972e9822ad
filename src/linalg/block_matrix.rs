//! Symmetric block matrix stored as a single upper-triangular arena.
//!
//! Blocks are addressed by index; `offsets` translates a block index into a
//! row/column offset inside the buffer. Only the upper triangle is authoritative:
//! readers never look below the diagonal, writers that receive a "lower" block
//! transpose it into the upper one.
//!
//! Elimination consumes leading blocks by moving `block_start` forward, so the
//! remainder reuses the same buffer without copying.

use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut, DVector};

use super::{LinAlgError, LinAlgResult};

#[derive(Debug)]
pub struct SymmetricBlockMatrix {
    matrix: DMatrix<f64>,
    /// Absolute block boundaries, `offsets.len() == total blocks + 1`.
    offsets: Vec<usize>,
    block_start: usize,
}

impl SymmetricBlockMatrix {
    /// Zero matrix with one block per entry of `dims`.
    pub fn zeros(dims: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(dims.len() + 1);
        offsets.push(0);
        let mut total = 0;
        for dim in dims {
            total += dim;
            offsets.push(total);
        }
        Self {
            matrix: DMatrix::zeros(total, total),
            offsets,
            block_start: 0,
        }
    }

    /// Number of active blocks.
    pub fn n_blocks(&self) -> usize {
        self.offsets.len() - 1 - self.block_start
    }

    /// Index of the first active block in the underlying buffer.
    pub fn block_start(&self) -> usize {
        self.block_start
    }

    /// Hide the first `count` active blocks.
    pub fn advance_block_start(&mut self, count: usize) -> LinAlgResult<()> {
        if count > self.n_blocks() {
            return Err(LinAlgError::DimensionMismatch(format!(
                "cannot drop {} blocks from a matrix with {} active blocks",
                count,
                self.n_blocks()
            ))
            .log());
        }
        self.block_start += count;
        Ok(())
    }

    /// Rows held by blocks already dropped with `advance_block_start`.
    pub fn hidden_dim(&self) -> usize {
        self.absolute(0)
    }

    /// Move the active part into a buffer of its own, releasing the hidden rows.
    pub fn compact(&mut self) {
        if self.block_start > 0 {
            *self = self.active_copy();
        }
    }

    fn active_copy(&self) -> Self {
        let base = self.absolute(0);
        Self {
            matrix: self.active().into_owned(),
            offsets: self.offsets[self.block_start..]
                .iter()
                .map(|o| o - base)
                .collect(),
            block_start: 0,
        }
    }

    fn absolute(&self, block: usize) -> usize {
        self.offsets[self.block_start + block]
    }

    /// Rows (and columns) of active block `block`.
    pub fn block_dim(&self, block: usize) -> usize {
        self.absolute(block + 1) - self.absolute(block)
    }

    /// Scalar offset of active block `block`, relative to the first active row.
    pub fn block_offset(&self, block: usize) -> usize {
        self.absolute(block) - self.absolute(0)
    }

    /// Total dimension of the active part.
    pub fn dim(&self) -> usize {
        self.matrix.nrows() - self.absolute(0)
    }

    /// Block dimensions of the active part.
    pub fn dims(&self) -> Vec<usize> {
        (0..self.n_blocks()).map(|b| self.block_dim(b)).collect()
    }

    /// Raw stored block `(i, j)`. Meaningful only for `i <= j`.
    pub fn block(&self, i: usize, j: usize) -> DMatrixView<'_, f64> {
        let (r, c) = (self.absolute(i), self.absolute(j));
        self.matrix
            .view((r, c), (self.block_dim(i), self.block_dim(j)))
    }

    pub fn block_mut(&mut self, i: usize, j: usize) -> DMatrixViewMut<'_, f64> {
        let (r, c) = (self.absolute(i), self.absolute(j));
        let (nr, nc) = (self.block_dim(i), self.block_dim(j));
        self.matrix.view_mut((r, c), (nr, nc))
    }

    /// Block `(i, j)` of the full symmetric matrix, for any `i`, `j`.
    pub fn symmetric_block(&self, i: usize, j: usize) -> DMatrix<f64> {
        if i < j {
            self.block(i, j).into_owned()
        } else if i > j {
            self.block(j, i).transpose()
        } else {
            let b = self.block(i, i);
            let n = b.nrows();
            DMatrix::from_fn(n, n, |r, c| if r <= c { b[(r, c)] } else { b[(c, r)] })
        }
    }

    /// Add `update` as the logical block `(i, j)` of the symmetric matrix.
    ///
    /// Contributions below the block diagonal are transposed into the upper block;
    /// a contribution on a diagonal block only touches its upper triangle.
    pub fn add_symmetric(
        &mut self,
        i: usize,
        j: usize,
        update: &DMatrixView<'_, f64>,
    ) -> LinAlgResult<()> {
        let (rows, cols) = if i <= j {
            (self.block_dim(i), self.block_dim(j))
        } else {
            (self.block_dim(j), self.block_dim(i))
        };
        let (ur, uc) = if i <= j {
            (update.nrows(), update.ncols())
        } else {
            (update.ncols(), update.nrows())
        };
        if (ur, uc) != (rows, cols) {
            return Err(LinAlgError::DimensionMismatch(format!(
                "block ({i}, {j}) is {rows}x{cols} but the update is {}x{}",
                update.nrows(),
                update.ncols()
            ))
            .log());
        }

        if i < j {
            let mut target = self.block_mut(i, j);
            target += update;
        } else if i > j {
            let mut target = self.block_mut(j, i);
            target += &update.transpose();
        } else {
            let mut target = self.block_mut(i, i);
            for c in 0..cols {
                for r in 0..=c {
                    target[(r, c)] += update[(r, c)];
                }
            }
        }
        Ok(())
    }

    /// The active square region, upper triangle authoritative.
    pub fn active(&self) -> DMatrixView<'_, f64> {
        let s = self.absolute(0);
        let n = self.dim();
        self.matrix.view((s, s), (n, n))
    }

    pub fn active_mut(&mut self) -> DMatrixViewMut<'_, f64> {
        let s = self.absolute(0);
        let n = self.dim();
        self.matrix.view_mut((s, s), (n, n))
    }

    /// The active region as a full symmetric matrix.
    pub fn full(&self) -> DMatrix<f64> {
        let a = self.active();
        let n = a.nrows();
        DMatrix::from_fn(n, n, |r, c| if r <= c { a[(r, c)] } else { a[(c, r)] })
    }

    /// Diagonal of active block `block`.
    pub fn block_diagonal(&self, block: usize) -> DVector<f64> {
        self.block(block, block).diagonal()
    }

    pub fn set_zero(&mut self) {
        self.active_mut().fill(0.0);
    }

    /// First non-finite entry of the upper triangle, in active coordinates.
    pub fn first_non_finite(&self) -> Option<(usize, usize)> {
        let a = self.active();
        let n = a.nrows();
        for c in 0..n {
            for r in 0..=c {
                if !a[(r, c)].is_finite() {
                    return Some((r, c));
                }
            }
        }
        None
    }
}

/// Clones carry only the active part.
impl Clone for SymmetricBlockMatrix {
    fn clone(&self) -> Self {
        self.active_copy()
    }
}

/// Equal block layout and equal upper triangle over the active part.
impl PartialEq for SymmetricBlockMatrix {
    fn eq(&self, other: &Self) -> bool {
        if self.dims() != other.dims() {
            return false;
        }
        let (a, b) = (self.active(), other.active());
        (0..a.ncols()).all(|c| (0..=c).all(|r| a[(r, c)] == b[(r, c)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dmatrix;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_offsets_and_dims() {
        let m = SymmetricBlockMatrix::zeros(&[2, 3, 1]);
        assert_eq!(m.n_blocks(), 3);
        assert_eq!(m.dim(), 6);
        assert_eq!(m.block_offset(1), 2);
        assert_eq!(m.block_offset(2), 5);
        assert_eq!(m.dims(), vec![2, 3, 1]);
    }

    #[test]
    fn test_lower_contribution_is_transposed() -> TestResult {
        let mut m = SymmetricBlockMatrix::zeros(&[1, 2]);
        let lower = dmatrix![1.0; 2.0];
        m.add_symmetric(1, 0, &lower.as_view())?;
        assert_eq!(m.block(0, 1), dmatrix![1.0, 2.0]);
        assert_eq!(m.symmetric_block(1, 0), lower);
        Ok(())
    }

    #[test]
    fn test_diagonal_contribution_touches_upper_only() -> TestResult {
        let mut m = SymmetricBlockMatrix::zeros(&[2]);
        let u = dmatrix![1.0, 2.0; 7.0, 3.0];
        m.add_symmetric(0, 0, &u.as_view())?;
        let stored = m.block(0, 0);
        assert_eq!(stored[(1, 0)], 0.0);
        assert_eq!(stored[(0, 1)], 2.0);
        assert_eq!(m.full(), dmatrix![1.0, 2.0; 2.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_mismatched_update_rejected() {
        let mut m = SymmetricBlockMatrix::zeros(&[2, 2]);
        let bad = DMatrix::<f64>::zeros(3, 2);
        assert!(m.add_symmetric(0, 1, &bad.as_view()).is_err());
    }

    #[test]
    fn test_advance_block_start_reuses_buffer() -> TestResult {
        let mut m = SymmetricBlockMatrix::zeros(&[1, 2, 1]);
        m.block_mut(1, 2)[(1, 0)] = 4.0;
        m.advance_block_start(1)?;
        assert_eq!(m.n_blocks(), 2);
        assert_eq!(m.dim(), 3);
        assert_eq!(m.block(0, 1)[(1, 0)], 4.0);
        assert!(m.advance_block_start(3).is_err());
        Ok(())
    }

    #[test]
    fn test_clone_and_compact_drop_hidden_rows() -> TestResult {
        let mut m = SymmetricBlockMatrix::zeros(&[3, 1, 1]);
        m.block_mut(0, 0)[(0, 0)] = 9.0;
        m.block_mut(1, 2)[(0, 0)] = 4.0;
        m.advance_block_start(1)?;

        let copy = m.clone();
        assert_eq!(copy.hidden_dim(), 0);
        assert_eq!(copy.block_start(), 0);
        assert_eq!(copy.dims(), vec![1, 1]);
        assert_eq!(copy.block(0, 1)[(0, 0)], 4.0);

        assert_eq!(m.hidden_dim(), 3);
        m.compact();
        assert_eq!(m.hidden_dim(), 0);
        assert_eq!(m.full(), copy.full());
        Ok(())
    }

    #[test]
    fn test_equality_ignores_hidden_rows_and_lower_triangle() -> TestResult {
        let mut eliminated = SymmetricBlockMatrix::zeros(&[2, 1, 1]);
        eliminated.block_mut(0, 0)[(0, 0)] = 5.0;
        eliminated.block_mut(0, 1)[(1, 0)] = -3.0;
        eliminated.block_mut(1, 2)[(0, 0)] = 2.0;
        eliminated.advance_block_start(1)?;

        let mut fresh = SymmetricBlockMatrix::zeros(&[1, 1]);
        fresh.block_mut(0, 1)[(0, 0)] = 2.0;
        assert_eq!(eliminated, fresh);

        // below-diagonal garbage is not part of the symmetric matrix
        fresh.active_mut()[(1, 0)] = 7.0;
        assert_eq!(eliminated, fresh);

        fresh.block_mut(1, 1)[(0, 0)] = 1.0;
        assert_ne!(eliminated, fresh);
        Ok(())
    }

    #[test]
    fn test_first_non_finite() {
        let mut m = SymmetricBlockMatrix::zeros(&[2, 1]);
        assert_eq!(m.first_non_finite(), None);
        m.block_mut(0, 1)[(1, 0)] = f64::NAN;
        assert_eq!(m.first_non_finite(), Some((1, 2)));
    }
}
