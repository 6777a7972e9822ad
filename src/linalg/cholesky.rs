use faer::{
    Mat, Side,
    linalg::solvers::Solve,
    sparse::linalg::solvers::{Llt, SymbolicLlt},
    sparse::{SparseColMat, Triplet},
};
use nalgebra::{DMatrix, DMatrixView, DVector};
use std::collections::BTreeMap;

use crate::linalg::{LinAlgError, LinAlgResult};

/// Symmetric system `H x = g` assembled block by block in global coordinates.
///
/// Entries are kept for both triangles so the sparse matrix handed to faer is the
/// full symmetric one.
#[derive(Debug, Clone)]
pub struct SparseSymmetricSystem {
    dim: usize,
    entries: BTreeMap<(usize, usize), f64>,
    rhs: DVector<f64>,
}

impl SparseSymmetricSystem {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: BTreeMap::new(),
            rhs: DVector::zeros(dim),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of stored (structurally non-zero) entries.
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Accumulate block `(row, col)` of `H`. Off-diagonal blocks are mirrored.
    pub fn add_block(
        &mut self,
        row_offset: usize,
        col_offset: usize,
        block: &DMatrixView<'_, f64>,
    ) -> LinAlgResult<()> {
        if row_offset + block.nrows() > self.dim || col_offset + block.ncols() > self.dim {
            return Err(LinAlgError::DimensionMismatch(format!(
                "block at ({row_offset}, {col_offset}) of size {}x{} exceeds system dimension {}",
                block.nrows(),
                block.ncols(),
                self.dim
            ))
            .log());
        }
        for c in 0..block.ncols() {
            for r in 0..block.nrows() {
                let v = block[(r, c)];
                if v == 0.0 {
                    continue;
                }
                let (gr, gc) = (row_offset + r, col_offset + c);
                *self.entries.entry((gr, gc)).or_insert(0.0) += v;
                if row_offset != col_offset {
                    *self.entries.entry((gc, gr)).or_insert(0.0) += v;
                }
            }
        }
        Ok(())
    }

    /// Accumulate a segment of the right-hand side.
    pub fn add_rhs(&mut self, offset: usize, values: &DVector<f64>) -> LinAlgResult<()> {
        if offset + values.len() > self.dim {
            return Err(LinAlgError::DimensionMismatch(format!(
                "rhs segment at {offset} of length {} exceeds system dimension {}",
                values.len(),
                self.dim
            ))
            .log());
        }
        let mut segment = self.rhs.rows_mut(offset, values.len());
        segment += values;
        Ok(())
    }

    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    /// Dense copy of `H`.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.dim, self.dim);
        for (&(r, c), &v) in &self.entries {
            dense[(r, c)] = v;
        }
        dense
    }

    fn pattern(&self) -> Vec<(usize, usize)> {
        self.entries.keys().copied().collect()
    }
}

/// Sparse LLᵀ solver for [`SparseSymmetricSystem`].
///
/// The symbolic factorization is cached and reused as long as the sparsity
/// pattern of successive systems is identical, which is the normal situation
/// across λ trials of one outer iteration and across relinearizations.
#[derive(Debug, Clone, Default)]
pub struct SparseCholeskySolver {
    symbolic_factorization: Option<SymbolicLlt<usize>>,
    cached_pattern: Vec<(usize, usize)>,
}

impl SparseCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_symbolic_cache(&self) -> bool {
        self.symbolic_factorization.is_some()
    }

    /// Solve `H x = g`.
    ///
    /// A numerical failure is returned as [`LinAlgError::SingularMatrix`] without
    /// logging: callers inside a damping loop treat it as a rejected trial.
    pub fn solve(&mut self, system: &SparseSymmetricSystem) -> LinAlgResult<DVector<f64>> {
        let n = system.dim();
        if n == 0 {
            return Ok(DVector::zeros(0));
        }

        let triplets: Vec<Triplet<usize, usize, f64>> = system
            .entries
            .iter()
            .map(|(&(r, c), &v)| Triplet::new(r, c, v))
            .collect();
        let hessian = SparseColMat::try_new_from_triplets(n, n, &triplets).map_err(|e| {
            LinAlgError::SparseMatrixCreation("Failed to assemble information matrix".to_string())
                .log_with_source(e)
        })?;

        let pattern = system.pattern();
        let sym = match &self.symbolic_factorization {
            // SymbolicLlt is reference-counted, clone is O(1)
            Some(cached) if self.cached_pattern == pattern => cached.clone(),
            _ => {
                let new_sym =
                    SymbolicLlt::try_new(hessian.symbolic(), Side::Lower).map_err(|e| {
                        LinAlgError::FactorizationFailed(
                            "Symbolic Cholesky decomposition failed".to_string(),
                        )
                        .log_with_source(e)
                    })?;
                self.symbolic_factorization = Some(new_sym.clone());
                self.cached_pattern = pattern;
                new_sym
            }
        };

        let cholesky = Llt::try_new_with_symbolic(sym, hessian.as_ref(), Side::Lower)
            .map_err(|_| LinAlgError::SingularMatrix)?;

        let rhs = Mat::from_fn(n, 1, |i, _| system.rhs[i]);
        let x = cholesky.solve(rhs);
        let solution = DVector::from_fn(n, |i, _| x[(i, 0)]);
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::SingularMatrix);
        }
        Ok(solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, dmatrix, dvector};

    type TestResult = Result<(), Box<dyn std::error::Error>>;
    const TOLERANCE: f64 = 1e-10;

    #[test]
    fn test_solve_small_spd_system() -> TestResult {
        let h = dmatrix![4.0, 1.0; 1.0, 3.0];
        let g = dvector![1.0, 2.0];
        let mut system = SparseSymmetricSystem::new(2);
        system.add_block(0, 0, &h.as_view())?;
        system.add_rhs(0, &g)?;

        let mut solver = SparseCholeskySolver::new();
        let x = solver.solve(&system)?;
        let residual = &h * &x - &g;
        assert!(residual.norm() < TOLERANCE, "residual {}", residual.norm());
        assert!(solver.has_symbolic_cache());
        Ok(())
    }

    #[test]
    fn test_off_diagonal_blocks_are_mirrored() -> TestResult {
        let mut system = SparseSymmetricSystem::new(3);
        system.add_block(0, 0, &DMatrix::<f64>::identity(1, 1).as_view())?;
        system.add_block(1, 1, &DMatrix::<f64>::identity(2, 2).as_view())?;
        let off = dmatrix![0.1, 0.2];
        system.add_block(0, 1, &off.as_view())?;
        assert_eq!(system.nnz(), 7);
        Ok(())
    }

    #[test]
    fn test_pattern_change_refreshes_symbolic() -> TestResult {
        let mut solver = SparseCholeskySolver::new();

        let mut diagonal = SparseSymmetricSystem::new(2);
        diagonal.add_block(0, 0, &(DMatrix::<f64>::identity(2, 2) * 2.0).as_view())?;
        diagonal.add_rhs(0, &dvector![2.0, 4.0])?;
        let x = solver.solve(&diagonal)?;
        assert!((x - dvector![1.0, 2.0]).norm() < TOLERANCE);

        let mut coupled = SparseSymmetricSystem::new(2);
        let h = dmatrix![2.0, 1.0; 1.0, 2.0];
        coupled.add_block(0, 0, &h.as_view())?;
        coupled.add_rhs(0, &dvector![3.0, 3.0])?;
        let x = solver.solve(&coupled)?;
        assert!((x - dvector![1.0, 1.0]).norm() < TOLERANCE);
        Ok(())
    }

    #[test]
    fn test_out_of_range_block_rejected() {
        let mut system = SparseSymmetricSystem::new(1);
        let h = DMatrix::<f64>::identity(2, 2);
        assert!(system.add_block(0, 0, &h.as_view()).is_err());
        assert!(system.add_rhs(1, &dvector![1.0]).is_err());
    }

    #[test]
    fn test_empty_system() -> TestResult {
        let mut solver = SparseCholeskySolver::new();
        let x = solver.solve(&SparseSymmetricSystem::new(0))?;
        assert_eq!(x.len(), 0);
        Ok(())
    }
}
