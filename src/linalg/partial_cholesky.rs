//! In-place partial Cholesky factorization.
//!
//! For an augmented symmetric matrix
//!
//! ```text
//! [ A11  A12 ]
//! [ A12ᵗ A22 ]
//! ```
//!
//! with `A11` of size `p × p`, `cholesky_partial` overwrites the upper triangle with
//!
//! ```text
//! [ R    S              ]      RᵗR = A11,  RᵗS = A12
//! [      A22 - SᵗS      ]
//! ```
//!
//! i.e. the top `p` rows become the eliminated rows and the lower-right block is the
//! Schur complement of `A11`. Only the upper triangle is read or written.

use nalgebra::DMatrixViewMut;

use super::{LinAlgError, LinAlgResult};

/// Factorize the leading `p` rows of `a` in place.
///
/// Fails with [`LinAlgError::NotPositiveDefinite`] when a pivot is not finite or
/// not positive relative to the largest frontal diagonal entry. The threshold scales
/// with the matrix, so uniformly tiny systems factor like unit-scale ones. The matrix content
/// is unspecified after a failure.
pub fn cholesky_partial(mut a: DMatrixViewMut<'_, f64>, p: usize) -> LinAlgResult<()> {
    let n = a.nrows();
    if a.ncols() != n || p > n {
        return Err(LinAlgError::DimensionMismatch(format!(
            "cannot eliminate {p} rows of a {}x{} matrix",
            a.nrows(),
            a.ncols()
        ))
        .log());
    }

    let scale = (0..p).map(|k| a[(k, k)].abs()).fold(0.0_f64, f64::max);
    let threshold = f64::EPSILON * scale;

    for k in 0..p {
        let pivot = a[(k, k)];
        if !pivot.is_finite() || pivot <= threshold {
            return Err(LinAlgError::NotPositiveDefinite { index: k, pivot });
        }
        let r = pivot.sqrt();
        a[(k, k)] = r;
        for j in (k + 1)..n {
            a[(k, j)] /= r;
        }
        // Right-looking rank-one update of the trailing upper triangle.
        for j in (k + 1)..n {
            let akj = a[(k, j)];
            if akj == 0.0 {
                continue;
            }
            for i in (k + 1)..=j {
                let aki = a[(k, i)];
                a[(i, j)] -= aki * akj;
            }
        }
    }
    Ok(())
}
